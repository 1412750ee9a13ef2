use axum::Router;

pub mod system;
pub mod users;

/// Router for the versioned API (`/api/v1`).
pub fn router() -> Router {
    Router::new().nest("/users", users::router())
}
