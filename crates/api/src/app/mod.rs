//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: store, cache and event bus wiring behind [`services::AppServices`]
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent `{ "error", "message" }` error responses
//! - `server.rs`: runs the router next to the create-user consumer until either stops

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod server;
pub mod services;

/// Build the full HTTP router around already-built services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

pub use server::{ConsumerTask, ServeError, serve};
pub use services::{AppServices, StartupError, build_services};
