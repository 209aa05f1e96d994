//! Sale recorder: one row per confirmed sale, with the commission split.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use slabmarket_batches::{BatchEvent, BatchId, ReservationId, SaleId};
use slabmarket_core::{IndustryId, UserId};
use slabmarket_events::EventEnvelope;

use crate::engine::BATCH_AGGREGATE_TYPE;
use crate::projections::cursor::{CursorDecision, StreamCursors};
use crate::projections::ProjectionError;
use crate::read_model::IndustryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRow {
    pub sale_id: SaleId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub confirmed_by: UserId,
    pub quantity: i64,
    pub gross_value: u64,
    pub commission_rate_bps: u32,
    pub commission_value: u64,
    pub net_value: u64,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SaleRecorderProjection<S>
where
    S: IndustryStore<SaleId, SaleRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SaleRecorderProjection<S>
where
    S: IndustryStore<SaleId, SaleRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, industry_id: IndustryId, sale_id: &SaleId) -> Option<SaleRow> {
        self.store.get(industry_id, sale_id)
    }

    pub fn list(&self, industry_id: IndustryId) -> Vec<SaleRow> {
        self.store.list(industry_id)
    }

    pub fn list_by_batch(&self, industry_id: IndustryId, batch_id: BatchId) -> Vec<SaleRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|row| row.batch_id == batch_id)
            .collect()
    }

    pub fn list_by_confirmer(&self, industry_id: IndustryId, confirmed_by: UserId) -> Vec<SaleRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|row| row.confirmed_by == confirmed_by)
            .collect()
    }

    /// Gross/commission/net totals for an industry, in the smallest currency
    /// unit.
    pub fn totals(&self, industry_id: IndustryId) -> (u64, u64, u64) {
        self.store.list(industry_id).iter().fold(
            (0, 0, 0),
            |(gross, commission, net), row| {
                (
                    gross + row.gross_value,
                    commission + row.commission_value,
                    net + row.net_value,
                )
            },
        )
    }

    /// Apply a published envelope into the recorder (idempotent).
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

        match &event {
            BatchEvent::SaleConfirmed(e) => {
                if e.industry_id != industry_id {
                    return Err(ProjectionError::IndustryIsolation(
                        "event industry_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    industry_id,
                    e.sale_id,
                    SaleRow {
                        sale_id: e.sale_id,
                        batch_id: e.batch_id,
                        reservation_id: e.reservation_id,
                        confirmed_by: e.confirmed_by,
                        quantity: e.quantity,
                        gross_value: e.gross_value,
                        commission_rate_bps: e.commission_rate_bps,
                        commission_value: e.commission_value,
                        net_value: e.net_value,
                        confirmed_at: e.occurred_at,
                    },
                );
            }
            BatchEvent::SaleDeleted(e) => {
                self.store.remove(industry_id, &e.sale_id);
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
