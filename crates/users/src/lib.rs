//! Users domain module.
//!
//! This crate contains the `User` entity and its events, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod user;

pub use user::{User, UserCreated, UserEvent, UserEventKind};
