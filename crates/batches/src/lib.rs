//! Batch availability & reservation domain module (event-sourced).
//!
//! This crate contains the business rules for slab batches: the quantity
//! state machine, time-bounded reservations and their conversion into sales.
//! Everything here is deterministic domain logic (no IO, no HTTP, no
//! storage). The `Batch` aggregate owns its reservations and sales, so every
//! quantity-changing decision on a child commits in the same event append as
//! the batch's own quantity change.

pub mod batch;
pub mod reservation;
pub mod sale;
pub mod unit;

pub use batch::{
    AdjustAvailability, ArchiveBatch, AvailabilityAdjusted, Batch, BatchArchived, BatchCommand,
    BatchCreated, BatchEvent, BatchId, BatchRestored, BatchStatus, CancelReservation, ConfirmSale,
    CreateBatch, DeleteSale, ExpireReservation, PricingUpdated, ProductId, QuantityReserved,
    ReservationReleased, Reserve, RestoreBatch, SaleConfirmed, SaleDeleted, UpdatePricing,
};
pub use reservation::{Reservation, ReservationId, ReservationStatus};
pub use sale::{Sale, SaleId, SaleTerms};
pub use unit::AreaUnit;
