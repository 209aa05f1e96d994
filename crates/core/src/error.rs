//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Failure reasons are user-facing business information ("why can't I reserve
/// this batch"), so each class keeps its own variant instead of collapsing
/// into a generic failure. Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation before any state change (e.g. malformed
    /// quantity or price).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The batch cannot cover the requested quantity (or is not sellable).
    #[error("out of stock: {0}")]
    OutOfStock(String),

    /// A status precondition failed (e.g. confirming an expired reservation,
    /// archiving a batch that still holds active reservations).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Idempotency guard: the reservation/sale already reached a terminal
    /// state and the operation would resolve it a second time.
    #[error("already resolved: {0}")]
    AlreadyResolved(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (duplicate identity, stale optimistic version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Authorization failure at the domain boundary (e.g. touching another
    /// broker's negotiated price).
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn out_of_stock(msg: impl Into<String>) -> Self {
        Self::OutOfStock(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn already_resolved(msg: impl Into<String>) -> Self {
        Self::AlreadyResolved(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
