//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// The identifier doubles as the business key under which a change tracker
/// registers the entity, so it must stay stable for the entity's lifetime.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
