//! Infrastructure publishers for the `lure-events` bus.
//!
//! The bus itself lives in `lure-events` as pure routing mechanics. This module provides the
//! Redis Streams-backed publisher for [`UserCreated`](lure_users::UserCreated).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, UserCreatedPublisher, connect};
