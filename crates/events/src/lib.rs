//! Domain events and their outbound distribution.
//!
//! - [`Event`] / [`EventVariant`]: a closed event enum per aggregate, tagged by kind.
//! - [`Publisher`]: sends one concrete event payload type to the outside world.
//! - [`EventBus`]: routes a published event to the single publisher bound to its kind.

pub mod bus;
pub mod event;
pub mod in_memory;
pub mod publisher;

pub use bus::{BusError, EventBus, EventBusBuilder};
pub use event::{Event, EventVariant};
pub use in_memory::InMemoryPublisher;
pub use publisher::{PublishError, Publisher};
