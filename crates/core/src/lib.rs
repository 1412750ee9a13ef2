//! `lure-core`: domain foundation building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): identifiers,
//! the domain error model, and the change-tracking structures a unit of work uses to
//! decide which loaded entities must be written back.

pub mod entity;
pub mod error;
pub mod id;
pub mod tracking;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::UserId;
pub use tracking::{ChangePredicate, EntityCollection, Snapshot, Tracked};
