//! Event log operations that do not involve an entity write: direct appends
//! from external producers, lookups, and the administrative purge.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::event::{ActionType, Actor, AuditEvent, EntityType, EventMetadata, NewEvent};
use crate::store::Store;

/// Body of `POST /api/v1/audit/logs`.
#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_id: Option<String>,
    pub action_type: ActionType,
    #[serde(default)]
    pub actor: Actor,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn is_null(state: &Option<Value>) -> bool {
    matches!(state, None | Some(Value::Null))
}

/// Checks the snapshot rules every event must obey and builds the event.
pub fn validate_new_event(req: RecordEventRequest) -> Result<NewEvent, AppError> {
    if req.entity_id.trim().is_empty() {
        return Err(AppError::Validation("entity_id must not be empty".to_string()));
    }
    match req.action_type {
        ActionType::Restored => {
            return Err(AppError::Validation(
                "restored events are only written by the restore endpoints".to_string(),
            ))
        }
        ActionType::Create if !is_null(&req.before_state) => {
            return Err(AppError::Validation(
                "create events must have a null before_state".to_string(),
            ))
        }
        ActionType::Delete if !is_null(&req.after_state) => {
            return Err(AppError::Validation(
                "delete events must have a null after_state".to_string(),
            ))
        }
        _ => {}
    }
    for (name, state) in [("before_state", &req.before_state), ("after_state", &req.after_state)] {
        if matches!(state, Some(v) if !v.is_null() && !v.is_object()) {
            return Err(AppError::Validation(format!(
                "{name} must be an object or null"
            )));
        }
    }
    if req.metadata.contains_key("before_state") || req.metadata.contains_key("after_state") {
        return Err(AppError::Validation(
            "snapshots go in before_state/after_state, not metadata".to_string(),
        ));
    }

    let mut metadata = EventMetadata::new(
        req.before_state.filter(|v| !v.is_null()),
        req.after_state.filter(|v| !v.is_null()),
    );
    metadata.extra = req.metadata;

    Ok(NewEvent {
        project_id: req.project_id,
        entity_type: req.entity_type,
        entity_id: req.entity_id,
        action_type: req.action_type,
        actor: req.actor,
        metadata,
    })
}

pub async fn record_event(
    store: &dyn Store,
    req: RecordEventRequest,
) -> Result<AuditEvent, AppError> {
    let event = store.append_event(validate_new_event(req)?).await?;
    info!(
        event_id = %event.id,
        entity_type = %event.entity_type,
        entity_id = %event.entity_id,
        action = event.action_type.as_str(),
        "Event recorded"
    );
    Ok(event)
}

pub async fn get_event(store: &dyn Store, event_id: Uuid) -> Result<AuditEvent, AppError> {
    store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {event_id}")))
}

/// Removes one log entry. Entity state is never touched.
pub async fn delete_entry(store: &dyn Store, event_id: Uuid) -> Result<(), AppError> {
    if !store.delete_event(event_id).await? {
        return Err(AppError::NotFound(format!("Event {event_id}")));
    }
    info!(%event_id, "Audit log entry purged");
    Ok(())
}
