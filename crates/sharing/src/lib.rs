//! Shared-inventory overlay.
//!
//! A supplier can expose a batch to external brokers. Each broker gets an
//! independent share entry carrying its own negotiated unit price, layered on
//! top of the batch without ever touching the batch's quantities. Shares live
//! in their own stream (keyed by the same batch id) so sharing churn never
//! contends with reservation traffic.

pub mod shares;

pub use shares::{
    BatchShared, BatchShares, NegotiatedPriceUpdated, RevokeShare, Share, ShareBatch,
    ShareRevoked, SharesCommand, SharesEvent, UpdateNegotiatedPrice,
};
