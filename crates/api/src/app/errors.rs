use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use lure_core::UserId;
use lure_infra::UserServiceError;
use lure_infra::store::StoreError;

pub fn user_error_to_response(err: UserServiceError) -> axum::response::Response {
    match err {
        UserServiceError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        UserServiceError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        UserServiceError::Store(StoreError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        UserServiceError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        UserServiceError::Finished => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            "unit of work is already finished",
        ),
        UserServiceError::Publish(e) => {
            json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse::<UserId>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
