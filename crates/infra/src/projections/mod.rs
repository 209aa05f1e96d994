//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and maintain query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructible from the event streams
//! - **Industry-isolated**: data is partitioned by industry
//! - **Idempotent**: safe under at-least-once delivery

pub mod cursor;

pub mod batch_availability;
pub mod reservation_ledger;
pub mod sale_recorder;
pub mod shared_listings;

pub use batch_availability::{BatchAvailabilityProjection, BatchAvailabilityRow};
pub use cursor::{CursorDecision, CursorError, StreamCursors};
pub use reservation_ledger::{ReservationLedgerProjection, ReservationRow};
pub use sale_recorder::{SaleRecorderProjection, SaleRow};
pub use shared_listings::{CatalogEntry, SharedListingsProjection, ShareRow};

use thiserror::Error;

/// Shared error type for projection apply paths.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("industry isolation violation: {0}")]
    IndustryIsolation(String),

    #[error(transparent)]
    Cursor(#[from] CursorError),
}
