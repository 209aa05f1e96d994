//! Batch availability read model: current quantities and status per batch.

use serde_json::Value as JsonValue;

use slabmarket_batches::{AreaUnit, BatchEvent, BatchId, BatchStatus, ProductId};
use slabmarket_core::IndustryId;
use slabmarket_events::EventEnvelope;

use crate::engine::BATCH_AGGREGATE_TYPE;
use crate::projections::cursor::{CursorDecision, StreamCursors};
use crate::projections::ProjectionError;
use crate::read_model::IndustryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAvailabilityRow {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub available_quantity: i64,
    pub status: BatchStatus,
    pub unit_price: u64,
    pub unit: AreaUnit,
}

impl BatchAvailabilityRow {
    fn quantity_derived_status(&self) -> BatchStatus {
        if self.total_quantity == 0 {
            BatchStatus::Sold
        } else if self.available_quantity == 0 {
            BatchStatus::Reserved
        } else {
            BatchStatus::Available
        }
    }
}

#[derive(Debug)]
pub struct BatchAvailabilityProjection<S>
where
    S: IndustryStore<BatchId, BatchAvailabilityRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> BatchAvailabilityProjection<S>
where
    S: IndustryStore<BatchId, BatchAvailabilityRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, industry_id: IndustryId, batch_id: &BatchId) -> Option<BatchAvailabilityRow> {
        self.store.get(industry_id, batch_id)
    }

    pub fn list(&self, industry_id: IndustryId) -> Vec<BatchAvailabilityRow> {
        self.store.list(industry_id)
    }

    /// Batches that can currently take a reservation.
    pub fn list_available(&self, industry_id: IndustryId) -> Vec<BatchAvailabilityRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|r| r.status == BatchStatus::Available && r.available_quantity > 0)
            .collect()
    }

    /// Apply a published envelope into the read model (idempotent).
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

        let update = |batch_id: &BatchId, f: &dyn Fn(&mut BatchAvailabilityRow)| {
            if let Some(mut row) = self.store.get(industry_id, batch_id) {
                f(&mut row);
                self.store.upsert(industry_id, *batch_id, row);
            }
        };

        match &event {
            BatchEvent::Created(e) => {
                if e.industry_id != industry_id {
                    return Err(ProjectionError::IndustryIsolation(
                        "event industry_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    industry_id,
                    e.batch_id,
                    BatchAvailabilityRow {
                        batch_id: e.batch_id,
                        product_id: e.product_id,
                        total_quantity: e.total_quantity,
                        available_quantity: e.total_quantity,
                        status: BatchStatus::Available,
                        unit_price: e.unit_price,
                        unit: e.unit,
                    },
                );
            }
            BatchEvent::Reserved(e) => update(&e.batch_id, &|row| {
                row.available_quantity -= e.quantity;
                if row.available_quantity == 0 {
                    row.status = BatchStatus::Reserved;
                }
            }),
            BatchEvent::ReservationCancelled(e) | BatchEvent::ReservationExpired(e) => {
                update(&e.batch_id, &|row| {
                    row.available_quantity += e.quantity;
                    if row.status == BatchStatus::Reserved && row.available_quantity > 0 {
                        row.status = BatchStatus::Available;
                    }
                })
            }
            BatchEvent::SaleConfirmed(e) => update(&e.batch_id, &|row| {
                row.total_quantity -= e.quantity;
                if row.total_quantity == 0 {
                    row.status = BatchStatus::Sold;
                }
            }),
            BatchEvent::SaleDeleted(_) => {}
            BatchEvent::AvailabilityAdjusted(e) => update(&e.batch_id, &|row| {
                row.available_quantity += e.quantity_delta;
                row.status = e.status_after;
            }),
            BatchEvent::Archived(e) => update(&e.batch_id, &|row| {
                row.status = BatchStatus::Archived;
            }),
            BatchEvent::Restored(e) => update(&e.batch_id, &|row| {
                row.status = row.quantity_derived_status();
            }),
            BatchEvent::PricingUpdated(e) => update(&e.batch_id, &|row| {
                row.unit_price = e.unit_price;
                row.unit = e.unit;
            }),
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
