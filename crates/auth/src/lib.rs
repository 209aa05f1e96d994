//! Role-based authorization for the brokering domain.
//!
//! Pure policy checks with no IO: callers resolve a [`Principal`] from their
//! transport (session, token) and ask whether it may perform a capability.
//! The role set is closed because the product has exactly three actor kinds.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use principal::Principal;
pub use roles::{ActorRole, Capability, capabilities};
