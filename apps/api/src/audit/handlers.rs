use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::diff::{diff_snapshots, FieldDiff};
use crate::audit::log::{delete_entry, get_event, record_event, RecordEventRequest};
use crate::audit::query::{fetch_page, EventPage, LogsQuery};
use crate::audit::restore::{restore_event, RestoreRequest, RestoreResult};
use crate::errors::AppError;
use crate::models::event::{ActionType, AuditEvent, EntityType};
use crate::state::AppState;

#[derive(Serialize)]
pub struct EventDiffResponse {
    pub event_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action_type: ActionType,
    pub diffs: Vec<FieldDiff>,
    pub computed_at: DateTime<Utc>,
}

/// GET /api/v1/audit/logs
pub async fn handle_list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<EventPage>, AppError> {
    let filter = params.to_filter()?;
    let limit = state.page_limits().resolve(params.limit)?;
    let page = fetch_page(
        state.store.as_ref(),
        &state.cursors,
        &filter,
        params.cursor.as_deref(),
        limit,
    )
    .await?;
    Ok(Json(page))
}

/// POST /api/v1/audit/logs
pub async fn handle_record_event(
    State(state): State<AppState>,
    Json(req): Json<RecordEventRequest>,
) -> Result<(StatusCode, Json<AuditEvent>), AppError> {
    let event = record_event(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /api/v1/audit/logs/:event_id
pub async fn handle_get_log(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<AuditEvent>, AppError> {
    Ok(Json(get_event(state.store.as_ref(), event_id).await?))
}

/// DELETE /api/v1/audit/logs/:event_id
pub async fn handle_delete_log(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    delete_entry(state.store.as_ref(), event_id).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// GET /api/v1/audit/diff/:event_id
pub async fn handle_event_diff(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventDiffResponse>, AppError> {
    let event = get_event(state.store.as_ref(), event_id).await?;
    let diffs = diff_snapshots(
        event.metadata.before_state.as_ref(),
        event.metadata.after_state.as_ref(),
    );
    Ok(Json(EventDiffResponse {
        event_id: event.id,
        entity_type: event.entity_type,
        entity_id: event.entity_id,
        action_type: event.action_type,
        diffs,
        computed_at: Utc::now(),
    }))
}

/// POST /api/v1/audit/restore/:event_id
/// Body is optional; without one the restore is unforced.
pub async fn handle_restore(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RestoreResult>, AppError> {
    let req = parse_restore_body(&headers, &body)?;
    let result = restore_event(
        state.store.as_ref(),
        state.config.conflict_scope,
        event_id,
        req,
    )
    .await?;
    Ok(Json(result))
}

/// An empty body means the defaults. Anything else must be a valid JSON
/// `RestoreRequest`, so a mistyped `force` is reported, not ignored.
fn parse_restore_body(headers: &HeaderMap, body: &[u8]) -> Result<RestoreRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RestoreRequest::default());
    }
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"));
    if !is_json {
        return Err(AppError::Validation(
            "Restore body must be sent as application/json".to_string(),
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid restore body: {e}")))
}
