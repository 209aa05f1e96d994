//! Shared listings read model: which batches each broker can see, and at
//! what price.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use slabmarket_batches::BatchId;
use slabmarket_core::{IndustryId, UserId};
use slabmarket_events::EventEnvelope;
use slabmarket_sharing::SharesEvent;

use crate::projections::cursor::{CursorDecision, StreamCursors};
use crate::projections::ProjectionError;
use crate::read_model::IndustryStore;
use crate::sharing::SHARES_AGGREGATE_TYPE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRow {
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub shared_by: UserId,
    pub negotiated_price: Option<u64>,
    pub shared_at: DateTime<Utc>,
}

/// One entry of a broker's catalog: the share joined with batch data
/// supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry<T> {
    pub share: ShareRow,
    pub batch: T,
    /// Negotiated price when present, otherwise the batch's list price.
    pub effective_price: u64,
}

#[derive(Debug)]
pub struct SharedListingsProjection<S>
where
    S: IndustryStore<(BatchId, UserId), ShareRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SharedListingsProjection<S>
where
    S: IndustryStore<(BatchId, UserId), ShareRow>,
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
        batch_id: BatchId,
        broker_id: UserId,
    ) -> Option<ShareRow> {
        self.store.get(industry_id, &(batch_id, broker_id))
    }

    pub fn list_for_broker(&self, industry_id: IndustryId, broker_id: UserId) -> Vec<ShareRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|r| r.broker_id == broker_id)
            .collect()
    }

    pub fn list_for_batch(&self, industry_id: IndustryId, batch_id: BatchId) -> Vec<ShareRow> {
        self.store
            .list(industry_id)
            .into_iter()
            .filter(|r| r.batch_id == batch_id)
            .collect()
    }

    /// Join the broker's shares with batch availability data.
    ///
    /// `lookup` resolves a batch id to its row and list price; shares whose
    /// batch cannot be resolved (archived out of the read model, in-flight
    /// deletion) are dropped from the catalog.
    pub fn catalog<T>(
        &self,
        industry_id: IndustryId,
        broker_id: UserId,
        lookup: impl Fn(&BatchId) -> Option<(T, u64)>,
    ) -> Vec<CatalogEntry<T>> {
        self.list_for_broker(industry_id, broker_id)
            .into_iter()
            .filter_map(|share| {
                let (batch, list_price) = lookup(&share.batch_id)?;
                let effective_price = share.negotiated_price.unwrap_or(list_price);
                Some(CatalogEntry {
                    share,
                    batch,
                    effective_price,
                })
            })
            .collect()
    }

    /// Apply a published envelope into the listings (idempotent).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != SHARES_AGGREGATE_TYPE {
            return Ok(());
        }

        let industry_id = envelope.industry_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if self.cursors.check(industry_id, aggregate_id, seq)? == CursorDecision::Skip {
            return Ok(());
        }

        let event: SharesEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            SharesEvent::Shared(e) => {
                if e.industry_id != industry_id {
                    return Err(ProjectionError::IndustryIsolation(
                        "event industry_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    industry_id,
                    (e.batch_id, e.broker_id),
                    ShareRow {
                        batch_id: e.batch_id,
                        broker_id: e.broker_id,
                        shared_by: e.shared_by,
                        negotiated_price: e.negotiated_price,
                        shared_at: e.occurred_at,
                    },
                );
            }
            SharesEvent::PriceUpdated(e) => {
                let key = (e.batch_id, e.broker_id);
                if let Some(mut row) = self.store.get(industry_id, &key) {
                    row.negotiated_price = Some(e.negotiated_price);
                    self.store.upsert(industry_id, key, row);
                }
            }
            SharesEvent::Revoked(e) => {
                self.store.remove(industry_id, &(e.batch_id, e.broker_id));
            }
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
