//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Repositories key records by `Entity::id`, so anything persisted through the
/// storage interface implements this.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
