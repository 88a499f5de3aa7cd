use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::restore::RestoreConflict;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The request is well-formed but the target is in the wrong state for it
    /// (restoring an event without a before-state, purging an active entity).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    /// A cursor this server did not mint, or one that no longer parses.
    #[error("Invalid pagination cursor")]
    InvalidCursor,

    #[error("Restore conflict on {} {}", .0.entity_type, .0.entity_id)]
    Conflict(RestoreConflict),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Conflict(conflict) => return conflict_response(conflict),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, "INVALID_STATE", msg.clone()),
            AppError::Duplicate(msg) => (StatusCode::CONFLICT, "ALREADY_EXISTS", msg.clone()),
            AppError::InvalidCursor => (
                StatusCode::BAD_REQUEST,
                "INVALID_CURSOR",
                "Cursor is not recognized; restart from the first page".to_string(),
            ),
            AppError::Storage(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred; no changes were applied".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// 409 body: the `RestoreConflict` fields at top level, so clients can render
/// the field comparison, plus the usual error envelope.
fn conflict_response(conflict: &RestoreConflict) -> Response {
    let mut body = serde_json::to_value(conflict).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        map.insert(
            "error".to_string(),
            json!({
                "code": "RESTORE_CONFLICT",
                "message": "Entity was modified after this event; retry with force to override"
            }),
        );
    }
    (StatusCode::CONFLICT, Json(body)).into_response()
}
