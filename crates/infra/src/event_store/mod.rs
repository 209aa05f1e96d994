//! Append-only event storage.
//!
//! One stream per aggregate instance, keyed by (industry_id, aggregate_id).
//! The stream version doubles as the optimistic-concurrency token: reserve
//! and confirm traffic on the same batch serializes through failed appends
//! plus retries rather than through row locks.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;
mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
