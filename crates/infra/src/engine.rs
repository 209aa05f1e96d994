//! Batch availability engine (application service).
//!
//! One entry point per business operation, each dispatched through the
//! event-sourcing pipeline with a bounded retry loop around optimistic
//! concurrency failures. Domain rejections (out of stock, already resolved,
//! validation) are never retried; only a lost append race is, because the
//! command may still succeed against the re-read state.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use slabmarket_batches::{
    AdjustAvailability, ArchiveBatch, Batch, BatchCommand, BatchEvent, BatchId, BatchStatus,
    CancelReservation, ConfirmSale, CreateBatch, DeleteSale, ExpireReservation, ProductId,
    Reservation, ReservationId, ReservationStatus, Reserve, RestoreBatch, Sale, SaleId, SaleTerms,
    UpdatePricing, AreaUnit,
};
use slabmarket_core::{AggregateRoot, DomainError, IndustryId, UserId};
use slabmarket_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

/// Stream type identifier for batch aggregates.
pub const BATCH_AGGREGATE_TYPE: &str = "batches.batch";

/// Tunable engine behavior.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// How long a reservation holds quantity before it becomes overdue.
    pub reservation_ttl: Duration,
    /// How many times a command is retried after a lost append race.
    pub retry_budget: u32,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::hours(24),
            retry_budget: 3,
        }
    }
}

impl EnginePolicy {
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The retry budget was exhausted by repeated append races.
    #[error("contention on batch stream after {attempts} attempts")]
    Contention { attempts: u32 },

    #[error("industry isolation violation: {0}")]
    Isolation(String),

    #[error("event payload deserialization failed: {0}")]
    Deserialize(String),

    #[error("event store failure: {0}")]
    Store(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

impl EngineError {
    pub(crate) fn from_dispatch(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => EngineError::Domain(e),
            DispatchError::Concurrency(_) => EngineError::Contention { attempts: 1 },
            DispatchError::IndustryIsolation(msg) => EngineError::Isolation(msg),
            DispatchError::Deserialize(msg) => EngineError::Deserialize(msg),
            DispatchError::Store(e) => EngineError::Store(e.to_string()),
            DispatchError::Publish(msg) => EngineError::Publish(msg),
        }
    }
}

/// Application service over the batch aggregate.
#[derive(Debug)]
pub struct AvailabilityEngine<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    policy: EnginePolicy,
}

impl<S, B> AvailabilityEngine<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self::with_policy(store, bus, EnginePolicy::default())
    }

    pub fn with_policy(store: S, bus: B, policy: EnginePolicy) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            policy,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }
}

impl<S, B> AvailabilityEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `op` with bounded retries on concurrency failures.
    ///
    /// Each retry re-dispatches the command, which reloads the stream, so
    /// the decision is always made against fresh state.
    fn execute<T>(
        &self,
        op: impl Fn() -> Result<T, DispatchError>,
    ) -> Result<T, EngineError> {
        let attempts = self.policy.retry_budget + 1;
        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_concurrency() && attempt < attempts => {
                    debug!(attempt, "append race lost, retrying");
                    std::thread::sleep(StdDuration::from_millis(2 * attempt as u64));
                }
                Err(err) if err.is_concurrency() => {
                    return Err(EngineError::Contention { attempts });
                }
                Err(err) => return Err(EngineError::from_dispatch(err)),
            }
        }
        Err(EngineError::Contention { attempts })
    }

    fn dispatch_batch(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        command: BatchCommand,
    ) -> Result<Vec<StoredEvent>, EngineError> {
        self.execute(|| {
            self.dispatcher.dispatch::<Batch>(
                industry_id,
                batch_id.0,
                BATCH_AGGREGATE_TYPE,
                command.clone(),
                |_, _| Batch::empty(batch_id),
            )
        })
    }

    /// Register a new batch and return its generated identifier.
    pub fn create_batch(
        &self,
        industry_id: IndustryId,
        product_id: ProductId,
        total_quantity: i64,
        unit_price: u64,
        unit: AreaUnit,
    ) -> Result<BatchId, EngineError> {
        let batch_id = BatchId::new(slabmarket_core::AggregateId::new());
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::Create(CreateBatch {
                industry_id,
                batch_id,
                product_id,
                total_quantity,
                unit_price,
                unit,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(batch_id)
    }

    /// Rehydrate a batch from its stream (read-only).
    pub fn load_batch(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
    ) -> Result<Batch, EngineError> {
        let batch = self
            .dispatcher
            .load::<Batch>(industry_id, batch_id.0, |_, _| Batch::empty(batch_id))
            .map_err(EngineError::from_dispatch)?;

        if batch.version() == 0 {
            return Err(EngineError::Domain(DomainError::not_found()));
        }
        Ok(batch)
    }

    /// Can the batch cover `quantity` units right now? Quantity defaults
    /// to 1 when omitted.
    pub fn check_availability(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        quantity: Option<i64>,
    ) -> Result<bool, EngineError> {
        let quantity = quantity.unwrap_or(1);
        if quantity <= 0 {
            return Err(EngineError::Domain(DomainError::validation(
                "quantity must be positive",
            )));
        }

        let batch = self.load_batch(industry_id, batch_id)?;
        Ok(batch.can_cover(quantity))
    }

    /// Hold quantity for `owner_id` until the reservation's TTL runs out.
    pub fn reserve(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        owner_id: UserId,
        quantity: i64,
    ) -> Result<Reservation, EngineError> {
        let reservation_id = ReservationId::new();
        let occurred_at = Utc::now();
        let expires_at = occurred_at + self.policy.reservation_ttl;

        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::Reserve(Reserve {
                industry_id,
                batch_id,
                reservation_id,
                owner_id,
                quantity,
                expires_at,
                occurred_at,
            }),
        )?;

        Ok(Reservation {
            id: reservation_id,
            owner_id,
            quantity,
            status: ReservationStatus::Active,
            created_at: occurred_at,
            expires_at,
        })
    }

    pub fn cancel(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        reservation_id: ReservationId,
    ) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::CancelReservation(CancelReservation {
                industry_id,
                batch_id,
                reservation_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Make an overdue reservation's release durable. Driven by the sweeper;
    /// `now` is passed in so sweeps are deterministic and testable.
    pub fn expire(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::ExpireReservation(ExpireReservation {
                industry_id,
                batch_id,
                reservation_id,
                occurred_at: now,
            }),
        )?;
        Ok(())
    }

    /// Convert an active reservation into a sale under the given terms.
    pub fn confirm_sale(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        reservation_id: ReservationId,
        confirmed_by: UserId,
        terms: SaleTerms,
    ) -> Result<Sale, EngineError> {
        let sale_id = SaleId::new();
        let committed = self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id,
                batch_id,
                reservation_id,
                sale_id,
                confirmed_by,
                terms,
                occurred_at: Utc::now(),
            }),
        )?;

        // The commission split is computed by the aggregate; read it back
        // from the committed event rather than recomputing here.
        for stored in &committed {
            let event: BatchEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            if let BatchEvent::SaleConfirmed(e) = event {
                return Ok(Sale {
                    id: e.sale_id,
                    reservation_id: e.reservation_id,
                    confirmed_by: e.confirmed_by,
                    quantity: e.quantity,
                    gross_value: e.gross_value,
                    commission_rate_bps: e.commission_rate_bps,
                    commission_value: e.commission_value,
                    net_value: e.net_value,
                    confirmed_at: e.occurred_at,
                });
            }
        }

        Err(EngineError::Store(
            "confirm_sale committed without a sale event".to_string(),
        ))
    }

    /// Administrative availability adjustment with an optional status
    /// precondition and an optional forced status.
    pub fn update_availability(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        quantity_delta: i64,
        target_status: Option<BatchStatus>,
        from_status: Option<BatchStatus>,
    ) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::AdjustAvailability(AdjustAvailability {
                industry_id,
                batch_id,
                target_status,
                from_status,
                quantity_delta,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn archive(&self, industry_id: IndustryId, batch_id: BatchId) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::Archive(ArchiveBatch {
                industry_id,
                batch_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn restore(&self, industry_id: IndustryId, batch_id: BatchId) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::Restore(RestoreBatch {
                industry_id,
                batch_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn delete_sale(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        sale_id: SaleId,
    ) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::DeleteSale(DeleteSale {
                industry_id,
                batch_id,
                sale_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn update_pricing(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        unit_price: u64,
        unit: AreaUnit,
    ) -> Result<(), EngineError> {
        self.dispatch_batch(
            industry_id,
            batch_id,
            BatchCommand::UpdatePricing(UpdatePricing {
                industry_id,
                batch_id,
                unit_price,
                unit,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use slabmarket_core::AggregateId;
    use slabmarket_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type TestEngine =
        AvailabilityEngine<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn engine() -> TestEngine {
        AvailabilityEngine::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn seeded_batch(engine: &TestEngine, industry_id: IndustryId, total: i64) -> BatchId {
        engine
            .create_batch(
                industry_id,
                ProductId::new(AggregateId::new()),
                total,
                30_000,
                AreaUnit::SquareMeter,
            )
            .unwrap()
    }

    #[test]
    fn reserve_then_check_availability() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 10);

        assert!(engine.check_availability(ind, batch_id, None).unwrap());
        assert!(engine.check_availability(ind, batch_id, Some(10)).unwrap());

        let reservation = engine.reserve(ind, batch_id, UserId::new(), 7).unwrap();
        assert_eq!(reservation.quantity, 7);
        assert_eq!(reservation.status, ReservationStatus::Active);

        assert!(engine.check_availability(ind, batch_id, Some(3)).unwrap());
        assert!(!engine.check_availability(ind, batch_id, Some(4)).unwrap());
    }

    #[test]
    fn oversell_is_rejected_as_out_of_stock() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 5);

        engine.reserve(ind, batch_id, UserId::new(), 5).unwrap();
        let err = engine.reserve(ind, batch_id, UserId::new(), 1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::OutOfStock(_))
        ));
    }

    #[test]
    fn cancel_restores_availability() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 5);

        let reservation = engine.reserve(ind, batch_id, UserId::new(), 5).unwrap();
        assert!(!engine.check_availability(ind, batch_id, None).unwrap());

        engine.cancel(ind, batch_id, reservation.id).unwrap();
        assert!(engine.check_availability(ind, batch_id, Some(5)).unwrap());
    }

    #[test]
    fn confirm_sale_returns_the_commission_split() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 10);
        let seller = UserId::new();

        let reservation = engine.reserve(ind, batch_id, seller, 4).unwrap();
        let sale = engine
            .confirm_sale(
                ind,
                batch_id,
                reservation.id,
                seller,
                SaleTerms {
                    gross_value: 200_000,
                    commission_rate_bps: 750,
                },
            )
            .unwrap();

        assert_eq!(sale.quantity, 4);
        assert_eq!(sale.commission_value, 15_000);
        assert_eq!(sale.net_value, 185_000);

        let batch = engine.load_batch(ind, batch_id).unwrap();
        assert_eq!(batch.total_quantity(), 6);
        assert_eq!(batch.available_quantity(), 6);
    }

    #[test]
    fn update_pricing_is_visible_on_reload() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 10);

        engine.reserve(ind, batch_id, UserId::new(), 3).unwrap();
        engine
            .update_pricing(ind, batch_id, 42_000, AreaUnit::SquareFoot)
            .unwrap();

        let batch = engine.load_batch(ind, batch_id).unwrap();
        assert_eq!(batch.unit_price(), 42_000);
        assert_eq!(batch.unit(), AreaUnit::SquareFoot);
        assert_eq!(batch.available_quantity(), 7);

        let err = engine
            .update_pricing(ind, batch_id, 0, AreaUnit::SquareFoot)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::Validation(_))
        ));
    }

    #[test]
    fn unknown_batch_is_not_found() {
        let engine = engine();
        let err = engine
            .check_availability(IndustryId::new(), BatchId::new(AggregateId::new()), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::NotFound)));
    }

    #[test]
    fn batches_are_invisible_across_industries() {
        let engine = engine();
        let ind = IndustryId::new();
        let batch_id = seeded_batch(&engine, ind, 5);

        let err = engine
            .load_batch(IndustryId::new(), batch_id)
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::NotFound)));
    }
}
