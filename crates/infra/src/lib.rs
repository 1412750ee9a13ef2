//! Infrastructure layer: stores, units of work, cache, streams, config and the user use cases.

pub mod cache;
pub mod config;
pub mod consumer;
pub mod event_bus;
pub mod storage;
pub mod store;
pub mod user_service;

pub use config::{Config, ConfigError};
pub use user_service::{CreateUserDto, UpdateUserDto, UserDto, UserService, UserServiceError};
