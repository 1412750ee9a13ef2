use chrono::{DateTime, Utc};

/// A domain event family (usually one enum per aggregate).
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **tagged**: `kind()` identifies the concrete variant at runtime, which is what the
///   [`EventBus`](crate::EventBus) dispatches on
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Runtime tag of a concrete event variant.
    type Kind: Copy + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Stable event name/type identifier (e.g. "users.created").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// A concrete payload type carried by one variant of the event family `E`.
///
/// Publishers are written against the payload type; the bus uses `KIND` to route and
/// `extract` to unwrap the family value before handing it over.
pub trait EventVariant<E: Event>: Sized + Send + Sync + 'static {
    const KIND: E::Kind;

    /// Unwrap the payload, or give the event back if it is another variant.
    fn extract(event: E) -> Result<Self, E>;
}
