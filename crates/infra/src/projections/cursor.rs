//! Per-stream cursors shared by all projections.
//!
//! The bus is at-least-once, so every projection guards its apply path with
//! a (industry, aggregate) → last-seen-sequence cursor: replays at or below
//! the cursor are ignored, gaps are rejected.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use slabmarket_core::{AggregateId, IndustryId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    industry_id: IndustryId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Outcome of a cursor check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorDecision {
    /// New event; apply it, then call `advance`.
    Apply,
    /// Duplicate or replay; skip silently.
    Skip,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        industry_id: IndustryId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<CursorDecision, CursorError> {
        let key = CursorKey {
            industry_id,
            aggregate_id,
        };
        let last = self
            .inner
            .read()
            .ok()
            .and_then(|m| m.get(&key).copied())
            .unwrap_or(0);

        if sequence_number == 0 {
            return Err(CursorError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        if sequence_number <= last {
            return Ok(CursorDecision::Skip);
        }
        // The first event of a stream may arrive at any positive sequence;
        // after that, strict +1 increments are required.
        if last != 0 && sequence_number != last + 1 {
            return Err(CursorError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }

        Ok(CursorDecision::Apply)
    }

    pub fn advance(
        &self,
        industry_id: IndustryId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(
                CursorKey {
                    industry_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }
    }

    pub fn reset(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}
