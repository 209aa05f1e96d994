//! Reservation ledger: one row per reservation, across batches.
//!
//! The sweeper reads this ledger to find overdue holds without loading
//! every batch stream.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use slabmarket_batches::{BatchEvent, BatchId, ReservationId, ReservationStatus};
use slabmarket_core::{IndustryId, UserId};
use slabmarket_events::EventEnvelope;

use crate::engine::BATCH_AGGREGATE_TYPE;
use crate::projections::cursor::{CursorDecision, StreamCursors};
use crate::projections::ProjectionError;
use crate::read_model::IndustryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRow {
    pub reservation_id: ReservationId,
    pub batch_id: BatchId,
    pub owner_id: UserId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReservationLedgerProjection<S>
where
    S: IndustryStore<ReservationId, ReservationRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ReservationLedgerProjection<S>
where
    S: IndustryStore<ReservationId, ReservationRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        industry_id: IndustryId,
        reservation_id: &ReservationId,
    ) -> Option<ReservationRow> {
        self.store.get(industry_id, reservation_id)
    }

    pub fn list_by_owner(&self, industry_id: IndustryId, owner_id: UserId) -> Vec<ReservationRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect()
    }

    pub fn list_by_batch(&self, industry_id: IndustryId, batch_id: BatchId) -> Vec<ReservationRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|r| r.batch_id == batch_id)
            .collect()
    }

    /// Active reservations whose deadline has passed, across all industries.
    pub fn list_overdue(&self, now: DateTime<Utc>) -> Vec<(IndustryId, ReservationRow)> {
        self.store
            .list_all()
            .into_iter()
            .filter(|(_, r)| r.status == ReservationStatus::Active && now > r.expires_at)
            .collect()
    }

    /// Apply a published envelope into the ledger (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != BATCH_AGGREGATE_TYPE {
            return Ok(());
        }

        let industry_id = envelope.industry_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if self.cursors.check(industry_id, aggregate_id, seq)? == CursorDecision::Skip {
            return Ok(());
        }

        let event: BatchEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let set_status = |id: &ReservationId, status: ReservationStatus| {
            if let Some(mut row) = self.store.get(industry_id, id) {
                row.status = status;
                self.store.upsert(industry_id, *id, row);
            }
        };

        match &event {
            BatchEvent::Reserved(e) => {
                if e.industry_id != industry_id {
                    return Err(ProjectionError::IndustryIsolation(
                        "event industry_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    industry_id,
                    e.reservation_id,
                    ReservationRow {
                        reservation_id: e.reservation_id,
                        batch_id: e.batch_id,
                        owner_id: e.owner_id,
                        quantity: e.quantity,
                        status: ReservationStatus::Active,
                        created_at: e.occurred_at,
                        expires_at: e.expires_at,
                    },
                );
            }
            BatchEvent::ReservationCancelled(e) => {
                set_status(&e.reservation_id, ReservationStatus::Cancelled);
            }
            BatchEvent::ReservationExpired(e) => {
                set_status(&e.reservation_id, ReservationStatus::Expired);
            }
            BatchEvent::SaleConfirmed(e) => {
                set_status(&e.reservation_id, ReservationStatus::Confirmed);
            }
            _ => {}
        }

        self.cursors.advance(industry_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.reset();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut industries = envs.iter().map(|e| e.industry_id()).collect::<Vec<_>>();
        industries.sort_by_key(|i| *i.as_uuid().as_bytes());
        industries.dedup();
        for i in industries {
            self.store.clear_industry(i);
        }

        // Deterministic replay order: industry, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.industry_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
