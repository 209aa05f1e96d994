//! Command execution pipeline (application-level orchestration).
//!
//! The dispatcher implements the full lifecycle for event-sourced aggregates:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (industry-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to the bus (projections)
//! ```
//!
//! Events are persisted before publication: if the append fails nothing is
//! published, and if publication fails the events are already durable, so
//! delivery to consumers is at-least-once and projections keep cursors.
//!
//! A failed optimistic check surfaces as [`DispatchError::Concurrency`]; it
//! is the only retryable outcome, and retrying means reloading the stream
//! and re-running the command against fresh state.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use slabmarket_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, IndustryId};
use slabmarket_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Deterministic domain rejection (validation, stock, lifecycle).
    Domain(DomainError),
    /// Optimistic concurrency failure (stale stream version). Retryable.
    Concurrency(String),
    /// Industry isolation violation (cross-industry stream access).
    IndustryIsolation(String),
    /// Failed to deserialize historical payloads into the aggregate's event
    /// type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (events are durable).
    Publish(String),
}

impl DispatchError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::IndustryIsolation(msg) => {
                DispatchError::IndustryIsolation(msg.clone())
            }
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in memory while
/// production wires a Postgres store behind the same trait.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without dispatching anything.
    ///
    /// Read-only path for availability checks and other queries that want
    /// current aggregate state rather than a projection.
    pub fn load<A>(
        &self,
        industry_id: IndustryId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(IndustryId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(industry_id, aggregate_id)?;
        validate_loaded_stream(industry_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(industry_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// The `make_aggregate` closure supplies a fresh rehydration target
    /// (e.g. `Batch::empty(id)`) so the dispatcher stays generic over
    /// aggregate construction.
    ///
    /// Returns the committed events (with assigned sequence numbers). The
    /// expectation for the append is the loaded stream's version, so a
    /// concurrent writer committing in between turns this call into
    /// `DispatchError::Concurrency`.
    pub fn dispatch<A>(
        &self,
        industry_id: IndustryId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(IndustryId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: slabmarket_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (industry-scoped)
        let history = self.store.load_stream(industry_id, aggregate_id)?;
        validate_loaded_stream(industry_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(industry_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    industry_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    industry_id: IndustryId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce industry isolation even if a buggy backend returns foreign
    // data, and require a strictly increasing sequence.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.industry_id != industry_id {
            return Err(DispatchError::IndustryIsolation(format!(
                "loaded stream contains wrong industry_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::IndustryIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
