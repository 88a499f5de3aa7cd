use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::entities::hierarchy::{parent_of, validate_parent, PARENT_FIELD};
use crate::errors::AppError;
use crate::models::entity::{EntityRecord, EntityState};
use crate::models::event::{ActionType, Actor, EntityType, EventMetadata, NewEvent};
use crate::store::{Committed, EntityWrite, Planned, Store};

#[derive(Debug, Deserialize)]
pub struct CreateEntity {
    pub id: Option<String>,
    pub project_id: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEntity {
    /// Top-level merge patch: `null` removes a field.
    pub data: Value,
    pub action_type: Option<ActionType>,
    #[serde(default)]
    pub actor: Actor,
}

/// Applies a top-level JSON merge patch.
pub fn merge_patch(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in patch {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn require_object<'a>(data: &'a Value, what: &str) -> Result<&'a Map<String, Value>, AppError> {
    data.as_object()
        .ok_or_else(|| AppError::Validation(format!("{what} must be a JSON object")))
}

fn committed_entity(
    committed: Committed,
    entity_type: EntityType,
    id: &str,
) -> Result<EntityRecord, AppError> {
    committed.entity.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Store returned no entity for {entity_type} {id} after write"
        ))
    })
}

/// Creates an entity and its `create` event (before = null).
pub async fn create_entity(
    store: &dyn Store,
    entity_type: EntityType,
    req: CreateEntity,
) -> Result<EntityRecord, AppError> {
    require_object(&req.data, "data")?;
    let id = match req.id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::Validation("id must not be empty".to_string()))
        }
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };
    let project_id = match entity_type {
        EntityType::Project => Some(id.clone()),
        _ => req.project_id,
    };

    if entity_type == EntityType::Prompt {
        validate_parent(store, project_id.as_deref(), &id, parent_of(&req.data)?).await?;
    }

    let data = req.data;
    let actor = req.actor;
    let event_id = id.clone();
    let committed = store
        .mutate_entity(
            entity_type,
            &id,
            Box::new(move |_current| {
                let event = NewEvent {
                    project_id: project_id.clone(),
                    entity_type,
                    entity_id: event_id,
                    action_type: ActionType::Create,
                    actor,
                    metadata: EventMetadata::new(None, Some(data.clone())),
                };
                Ok(Planned::audited(
                    EntityWrite::Insert(EntityState {
                        project_id,
                        data,
                        deleted_at: None,
                    }),
                    event,
                ))
            }),
        )
        .await?;

    info!(%entity_type, entity_id = %id, "Entity created");
    committed_entity(committed, entity_type, &id)
}

/// Patches an active entity. A no-op patch writes and audits nothing.
pub async fn update_entity(
    store: &dyn Store,
    entity_type: EntityType,
    id: &str,
    req: UpdateEntity,
) -> Result<EntityRecord, AppError> {
    let patch = require_object(&req.data, "data")?.clone();
    let action_type = req.action_type.unwrap_or(ActionType::Update);
    if !matches!(
        action_type,
        ActionType::Update | ActionType::StatusChange | ActionType::Reorder
    ) {
        return Err(AppError::Validation(format!(
            "action_type '{}' is not an entity update",
            action_type.as_str()
        )));
    }

    if entity_type == EntityType::Prompt && patch.contains_key(PARENT_FIELD) {
        let existing = get_entity(store, entity_type, id).await?;
        let patch_value = Value::Object(patch.clone());
        let new_parent = parent_of(&patch_value)?;
        validate_parent(store, existing.project_id.as_deref(), id, new_parent).await?;
    }

    let actor = req.actor;
    let entity_id = id.to_string();
    let committed = store
        .mutate_entity(
            entity_type,
            id,
            Box::new(move |current| {
                let current = current
                    .filter(|c| !c.is_trashed())
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {entity_id}")))?;
                let before = current.snapshot();
                let base = before.as_object().cloned().unwrap_or_default();
                let after = Value::Object(merge_patch(&base, &patch));
                if after == before {
                    return Ok(Planned::unchanged());
                }

                let event = NewEvent {
                    project_id: current.project_id.clone(),
                    entity_type,
                    entity_id,
                    action_type,
                    actor,
                    metadata: EventMetadata::new(Some(before), Some(after.clone())),
                };
                let mut state = current.state();
                state.data = after;
                Ok(Planned::audited(EntityWrite::Update(state), event))
            }),
        )
        .await?;

    if committed.event.is_some() {
        info!(%entity_type, entity_id = id, action = action_type.as_str(), "Entity updated");
    }
    committed_entity(committed, entity_type, id)
}

/// Active entity by id. Trashed entities are invisible here.
pub async fn get_entity(
    store: &dyn Store,
    entity_type: EntityType,
    id: &str,
) -> Result<EntityRecord, AppError> {
    store
        .get_entity(entity_type, id)
        .await?
        .filter(|e| !e.is_trashed())
        .ok_or_else(|| AppError::NotFound(format!("{entity_type} {id}")))
}

pub async fn list_entities(
    store: &dyn Store,
    entity_type: EntityType,
    project_id: Option<&str>,
) -> Result<Vec<EntityRecord>, AppError> {
    store.list_entities(entity_type, project_id, false).await
}
