//! Shared-inventory application service.
//!
//! Thin dispatch wrapper over the `BatchShares` aggregate. Shares live in
//! their own stream ("sharing.batch") so sharing churn never contends with
//! reservation traffic on the batch stream.

use serde_json::Value as JsonValue;
use chrono::Utc;
use uuid::Uuid;

use slabmarket_batches::BatchId;
use slabmarket_core::{AggregateId, IndustryId, UserId};
use slabmarket_events::{EventBus, EventEnvelope};
use slabmarket_sharing::{
    BatchShares, RevokeShare, ShareBatch, SharesCommand, UpdateNegotiatedPrice,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::engine::EngineError;
use crate::event_store::EventStore;

/// Stream type identifier for share-table aggregates.
pub const SHARES_AGGREGATE_TYPE: &str = "sharing.batch";

/// Namespace for deriving share-stream ids.
const SHARES_STREAM_NAMESPACE: Uuid = Uuid::from_u128(0x5b1c_82f4_3e9a_4c6d_8d01_7a2e_9f64_c350);

/// Streams are keyed by (industry_id, aggregate_id) only, so the share table
/// cannot reuse the batch id without landing in the batch's own stream. The
/// shares stream id is derived deterministically from the batch id instead,
/// keeping it addressable without a lookup table.
fn shares_stream_id(batch_id: BatchId) -> AggregateId {
    AggregateId::from_uuid(Uuid::new_v5(
        &SHARES_STREAM_NAMESPACE,
        batch_id.0.as_uuid().as_bytes(),
    ))
}

#[derive(Debug)]
pub struct SharingService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> SharingService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }
}

impl<S, B> SharingService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn dispatch(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        command: SharesCommand,
    ) -> Result<(), EngineError> {
        self.dispatcher
            .dispatch::<BatchShares>(
                industry_id,
                shares_stream_id(batch_id),
                SHARES_AGGREGATE_TYPE,
                command,
                |_, _| BatchShares::empty(batch_id),
            )
            .map_err(EngineError::from_dispatch)?;
        Ok(())
    }

    /// Expose a batch to a broker, optionally with an initial negotiated
    /// price.
    pub fn share(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        broker_id: UserId,
        shared_by: UserId,
        negotiated_price: Option<u64>,
    ) -> Result<(), EngineError> {
        self.dispatch(
            industry_id,
            batch_id,
            SharesCommand::Share(ShareBatch {
                industry_id,
                batch_id,
                broker_id,
                shared_by,
                negotiated_price,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn update_negotiated_price(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        broker_id: UserId,
        acting_user: UserId,
        negotiated_price: u64,
    ) -> Result<(), EngineError> {
        self.dispatch(
            industry_id,
            batch_id,
            SharesCommand::UpdateNegotiatedPrice(UpdateNegotiatedPrice {
                industry_id,
                batch_id,
                broker_id,
                acting_user,
                negotiated_price,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn revoke(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
        broker_id: UserId,
    ) -> Result<(), EngineError> {
        self.dispatch(
            industry_id,
            batch_id,
            SharesCommand::Revoke(RevokeShare {
                industry_id,
                batch_id,
                broker_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Rehydrate the share table for a batch (read-only).
    pub fn load_shares(
        &self,
        industry_id: IndustryId,
        batch_id: BatchId,
    ) -> Result<BatchShares, EngineError> {
        self.dispatcher
            .load::<BatchShares>(industry_id, shares_stream_id(batch_id), |_, _| {
                BatchShares::empty(batch_id)
            })
            .map_err(EngineError::from_dispatch)
    }
}
