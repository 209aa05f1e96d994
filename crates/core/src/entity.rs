//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Used for child objects owned by an aggregate (a reservation held by a
/// batch, a sale derived from a reservation): they carry identity but are
/// persisted and locked through their owning root.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
