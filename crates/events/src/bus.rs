//! Kind-indexed event bus (routing mechanics only).
//!
//! The bus maps each event kind to **exactly one** publisher and forwards a published
//! event to the publisher bound to its runtime kind.
//!
//! ## Design Philosophy
//!
//! - **Closed event families**: events are enums implementing [`Event`]; each variant's
//!   payload implements [`EventVariant`], so a publisher is written against the concrete
//!   payload type (`Publisher<UserCreated>`) rather than the whole family
//! - **No central switch**: adding a variant means adding a payload type and registering a
//!   publisher for it; the bus itself never changes
//! - **Built once**: routes are registered through [`EventBusBuilder`] at startup. The
//!   built [`EventBus`] is immutable, so concurrent `publish` calls need no locking
//! - **Fail loudly**: publishing a kind nobody registered is an error
//!   ([`BusError::NotRegistered`]), never a silent drop
//!
//! ## Delivery
//!
//! `publish` is synchronous relative to the caller: it returns once the publisher has
//! returned, and the publisher's failure is handed back unchanged. There is no retry
//! and no outbox; callers that publish after a commit must treat a publish failure as a
//! failed operation.
//!
//! ```ignore
//! let bus = EventBus::<UserEvent>::builder()
//!     .with_publisher::<UserCreated, _>(user_created_publisher)?
//!     .build();
//!
//! bus.publish(UserEvent::Created(created)).await?;
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::{Event, EventVariant};
use crate::publisher::{PublishError, Publisher};

#[derive(Debug, Error)]
pub enum BusError {
    /// No publisher is bound to the event's kind.
    #[error("event is not registered: {0}")]
    NotRegistered(String),

    /// A second publisher was offered for an already bound kind.
    #[error("a publisher is already registered for event: {0}")]
    AlreadyRegistered(String),

    /// The payload type bound to a kind could not be extracted from the event.
    ///
    /// Routes are keyed by `V::KIND`, so this only happens when an [`EventVariant`] impl
    /// declares a `KIND` that its `extract` does not accept.
    #[error("event of kind {0} does not carry the registered payload type")]
    KindMismatch(String),

    /// The bound publisher failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Type-erased route from an event family value to one concrete publisher.
#[async_trait]
trait Route<E: Event>: Send + Sync {
    async fn dispatch(&self, event: E) -> Result<(), BusError>;
}

struct VariantRoute<V, P> {
    publisher: P,
    _variant: PhantomData<fn() -> V>,
}

#[async_trait]
impl<E, V, P> Route<E> for VariantRoute<V, P>
where
    E: Event,
    V: EventVariant<E>,
    P: Publisher<V>,
{
    async fn dispatch(&self, event: E) -> Result<(), BusError> {
        let kind = event.kind();
        let payload =
            V::extract(event).map_err(|_| BusError::KindMismatch(format!("{kind:?}")))?;

        self.publisher.publish(payload).await?;
        Ok(())
    }
}

/// Immutable kind → publisher routing table.
pub struct EventBus<E: Event> {
    routes: HashMap<E::Kind, Box<dyn Route<E>>>,
}

impl<E: Event> EventBus<E> {
    pub fn builder() -> EventBusBuilder<E> {
        EventBusBuilder::default()
    }

    /// Forward `event` to the publisher bound to its runtime kind.
    pub async fn publish(&self, event: E) -> Result<(), BusError> {
        let kind = event.kind();

        let Some(route) = self.routes.get(&kind) else {
            warn!(kind = ?kind, event_type = event.event_type(), "event is not registered");
            return Err(BusError::NotRegistered(format!("{kind:?}")));
        };

        debug!(kind = ?kind, event_type = event.event_type(), "publishing event");
        route.dispatch(event).await
    }

    pub fn is_registered(&self, kind: E::Kind) -> bool {
        self.routes.contains_key(&kind)
    }

    pub fn registered_kinds(&self) -> impl Iterator<Item = &E::Kind> {
        self.routes.keys()
    }
}

impl<E: Event> core::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Startup-time registration of publishers.
pub struct EventBusBuilder<E: Event> {
    routes: HashMap<E::Kind, Box<dyn Route<E>>>,
}

impl<E: Event> Default for EventBusBuilder<E> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<E: Event> EventBusBuilder<E> {
    /// Bind the payload type `V` (and therefore its kind) to `publisher`.
    ///
    /// Fails with [`BusError::AlreadyRegistered`] if the kind is already bound.
    pub fn with_publisher<V, P>(mut self, publisher: P) -> Result<Self, BusError>
    where
        V: EventVariant<E>,
        P: Publisher<V> + 'static,
    {
        if self.routes.contains_key(&V::KIND) {
            return Err(BusError::AlreadyRegistered(format!("{:?}", V::KIND)));
        }

        self.routes.insert(
            V::KIND,
            Box::new(VariantRoute {
                publisher,
                _variant: PhantomData::<fn() -> V>,
            }),
        );
        Ok(self)
    }

    pub fn build(self) -> EventBus<E> {
        EventBus {
            routes: self.routes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::in_memory::InMemoryPublisher;

    #[derive(Debug, Clone, PartialEq)]
    struct Opened {
        account: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Closed {
        account: u32,
        reason: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum AccountEvent {
        Opened(Opened),
        Closed(Closed),
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    enum AccountEventKind {
        Opened,
        Closed,
    }

    impl Event for AccountEvent {
        type Kind = AccountEventKind;

        fn kind(&self) -> AccountEventKind {
            match self {
                AccountEvent::Opened(_) => AccountEventKind::Opened,
                AccountEvent::Closed(_) => AccountEventKind::Closed,
            }
        }

        fn event_type(&self) -> &'static str {
            match self {
                AccountEvent::Opened(_) => "accounts.opened",
                AccountEvent::Closed(_) => "accounts.closed",
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    impl EventVariant<AccountEvent> for Opened {
        const KIND: AccountEventKind = AccountEventKind::Opened;

        fn extract(event: AccountEvent) -> Result<Self, AccountEvent> {
            match event {
                AccountEvent::Opened(e) => Ok(e),
                other => Err(other),
            }
        }
    }

    impl EventVariant<AccountEvent> for Closed {
        const KIND: AccountEventKind = AccountEventKind::Closed;

        fn extract(event: AccountEvent) -> Result<Self, AccountEvent> {
            match event {
                AccountEvent::Closed(e) => Ok(e),
                other => Err(other),
            }
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher<Closed> for FailingPublisher {
        async fn publish(&self, _event: Closed) -> Result<(), PublishError> {
            Err(PublishError::Transport("broker unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn routes_event_to_the_publisher_of_its_kind() {
        let opened = Arc::new(InMemoryPublisher::<Opened>::new());
        let closed = Arc::new(InMemoryPublisher::<Closed>::new());
        let bus = EventBus::<AccountEvent>::builder()
            .with_publisher::<Opened, _>(opened.clone())
            .unwrap()
            .with_publisher::<Closed, _>(closed.clone())
            .unwrap()
            .build();

        let event = Closed {
            account: 7,
            reason: "requested".to_string(),
        };
        bus.publish(AccountEvent::Closed(event.clone())).await.unwrap();

        assert_eq!(closed.published(), vec![event]);
        assert!(opened.published().is_empty());
    }

    #[tokio::test]
    async fn unregistered_kind_fails_without_side_effects() {
        let opened = Arc::new(InMemoryPublisher::<Opened>::new());
        let bus = EventBus::<AccountEvent>::builder()
            .with_publisher::<Opened, _>(opened.clone())
            .unwrap()
            .build();

        let err = bus
            .publish(AccountEvent::Closed(Closed {
                account: 1,
                reason: "fraud".to_string(),
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::NotRegistered(kind) if kind == "Closed"));
        assert!(opened.published().is_empty());
        assert!(!bus.is_registered(AccountEventKind::Closed));
    }

    #[tokio::test]
    async fn publisher_failure_is_returned_unchanged() {
        let bus = EventBus::<AccountEvent>::builder()
            .with_publisher::<Closed, _>(FailingPublisher)
            .unwrap()
            .build();

        let err = bus
            .publish(AccountEvent::Closed(Closed {
                account: 1,
                reason: "moved".to_string(),
            }))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BusError::Publish(PublishError::Transport(msg)) if msg == "broker unavailable"
        ));
    }

    #[test]
    fn second_publisher_for_a_kind_is_rejected() {
        let err = EventBus::<AccountEvent>::builder()
            .with_publisher::<Opened, _>(InMemoryPublisher::<Opened>::new())
            .unwrap()
            .with_publisher::<Opened, _>(InMemoryPublisher::<Opened>::new())
            .err()
            .unwrap();

        assert!(matches!(err, BusError::AlreadyRegistered(kind) if kind == "Opened"));
    }

    #[test]
    fn empty_bus_registers_nothing() {
        let bus = EventBus::<AccountEvent>::builder().build();
        assert_eq!(bus.registered_kinds().count(), 0);
        assert!(format!("{bus:?}").contains("EventBus"));
    }

    #[test]
    fn extract_hands_back_foreign_variants() {
        let event = AccountEvent::Opened(Opened { account: 3 });
        let back = Closed::extract(event.clone()).unwrap_err();
        assert_eq!(back, event);
    }

    /// Claims the `Opened` kind but only extracts `Closed` events.
    #[derive(Debug)]
    struct Mislabelled;

    impl EventVariant<AccountEvent> for Mislabelled {
        const KIND: AccountEventKind = AccountEventKind::Opened;

        fn extract(event: AccountEvent) -> Result<Self, AccountEvent> {
            match event {
                AccountEvent::Closed(_) => Ok(Mislabelled),
                other => Err(other),
            }
        }
    }

    #[tokio::test]
    async fn variant_whose_kind_disagrees_with_extract_is_a_kind_mismatch() {
        let bus = EventBus::<AccountEvent>::builder()
            .with_publisher::<Mislabelled, _>(InMemoryPublisher::<Mislabelled>::new())
            .unwrap()
            .build();

        let err = bus
            .publish(AccountEvent::Opened(Opened { account: 9 }))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::KindMismatch(kind) if kind == "Opened"));
    }
}
