use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use lure_infra::UserServiceError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match within(services.request_timeout(), services.get_user(id)).await {
        Ok(user) => (StatusCode::OK, Json(dto::UserResponse::from(user))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(rejection),
    };

    match within(services.request_timeout(), services.create_user(body.into())).await {
        Ok(id) => (
            StatusCode::CREATED,
            [(header::CONTENT_LOCATION, format!("/api/v1/users/{id}"))],
            Json(dto::CreateUserResponse { id }),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match errors::parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(rejection),
    };

    match within(services.request_timeout(), services.update_user(id, body.into())).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(resp) => resp,
    }
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match within(services.request_timeout(), services.delete_user(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}

/// Run a use case under the request deadline. An expired deadline drops the use case, which
/// rolls back any open unit of work.
async fn within<T, F>(timeout: Duration, op: F) -> Result<T, axum::response::Response>
where
    F: Future<Output = Result<T, UserServiceError>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result.map_err(errors::user_error_to_response),
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
            Err(errors::json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                "request timed out",
            ))
        }
    }
}

fn invalid_body(rejection: JsonRejection) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
}
