//! Event-level restore: write an event's before-state back onto its entity.
//!
//! The whole read-check-write sequence (load live state, detect conflicts,
//! apply, append the `restored` event) runs inside one `mutate_entity` scope,
//! so a concurrent writer either lands first and is caught by conflict
//! detection, or waits until this restore has committed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::conflict::{detect, ConflictScope};
use crate::audit::diff::{diff_snapshots, DiffValue, FieldDiff};
use crate::entities::hierarchy::{load_arena, parent_of};
use crate::errors::AppError;
use crate::models::entity::{EntityRecord, EntityState};
use crate::models::event::{ActionType, Actor, AuditEvent, EntityType, EventMetadata, NewEvent};
use crate::store::{EntityWrite, Planned, Store};

#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub restored: bool,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub restored_from_event: Uuid,
    pub entity: EntityRecord,
    pub forced: bool,
}

/// Returned with 409 when the entity changed after the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreConflict {
    pub conflicts: Vec<FieldDiff>,
    pub event_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
}

/// New entity data for a restore of `event` onto `current`.
///
/// `Full`: the before-snapshot verbatim. `Touched`: only the fields the event
/// changed are reverted, so unrelated later edits survive. Deletes changed no
/// fields, so they always take the before-snapshot.
fn restored_data(
    event: &AuditEvent,
    before: &Value,
    current: &Value,
    scope: ConflictScope,
) -> Value {
    let after = match (&event.metadata.after_state, scope, event.action_type) {
        (Some(after), ConflictScope::Touched, action) if action != ActionType::Delete => after,
        _ => return before.clone(),
    };

    let mut data = current.as_object().cloned().unwrap_or_default();
    for revert in diff_snapshots(Some(after), Some(before)) {
        match revert.after {
            DiffValue::Value(v) => {
                data.insert(revert.field, v);
            }
            DiffValue::Undefined => {
                data.remove(&revert.field);
            }
        }
    }
    Value::Object(data)
}

pub async fn restore_event(
    store: &dyn Store,
    scope: ConflictScope,
    event_id: Uuid,
    req: RestoreRequest,
) -> Result<RestoreResult, AppError> {
    let event = store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {event_id}")))?;

    let before = event.restorable_state().cloned().ok_or_else(|| {
        AppError::InvalidState(format!(
            "Event {event_id} ({}) has no before-state to restore",
            event.action_type.as_str()
        ))
    })?;

    if !before.is_object() {
        return Err(AppError::InvalidState(format!(
            "Event {event_id} has a before-state that is not an object"
        )));
    }

    let RestoreRequest { force, actor } = req;
    let entity_type = event.entity_type;
    let entity_id = event.entity_id.clone();

    // Restored prompt data may move the prompt in its tree; it gets the same
    // cycle check as an update.
    let arena = match entity_type {
        EntityType::Prompt => {
            let project_id = store
                .get_entity(entity_type, &entity_id)
                .await?
                .and_then(|e| e.project_id);
            Some(load_arena(store, project_id.as_deref()).await?)
        }
        _ => None,
    };

    let committed = store
        .mutate_entity(
            entity_type,
            &entity_id,
            Box::new(move |current| {
                let current = current.ok_or_else(|| {
                    AppError::NotFound(format!(
                        "{} {} no longer exists",
                        event.entity_type, event.entity_id
                    ))
                })?;
                let live = current.snapshot();

                if !force {
                    let conflicts = detect(&event, &live, scope);
                    if !conflicts.is_empty() {
                        return Err(AppError::Conflict(RestoreConflict {
                            conflicts,
                            event_id: event.id,
                            entity_type: event.entity_type,
                            entity_id: event.entity_id.clone(),
                        }));
                    }
                }

                let data = restored_data(&event, &before, &live, scope);
                if let Some(arena) = &arena {
                    let target = parent_of(&data)?;
                    if target != parent_of(&live)? {
                        arena.check_reparent(&event.entity_id, target)?;
                    }
                }
                let deleted_at = match event.action_type {
                    ActionType::Delete => None,
                    _ => current.deleted_at,
                };

                let restored_event = NewEvent {
                    project_id: current.project_id.clone(),
                    entity_type: event.entity_type,
                    entity_id: event.entity_id.clone(),
                    action_type: ActionType::Restored,
                    actor,
                    metadata: EventMetadata::new(None, Some(data.clone()))
                        .with("restored_from_event", event.id.to_string())
                        .with("forced", force),
                };
                Ok(Planned::audited(
                    EntityWrite::Update(EntityState {
                        project_id: current.project_id,
                        data,
                        deleted_at,
                    }),
                    restored_event,
                ))
            }),
        )
        .await
        .map_err(|e| {
            if let AppError::Conflict(c) = &e {
                warn!(
                    %event_id,
                    %entity_type,
                    entity_id = %c.entity_id,
                    fields = c.conflicts.len(),
                    "Restore blocked by conflicting changes"
                );
            }
            e
        })?;

    let entity = committed.entity.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Restore of event {event_id} committed without an entity"
        ))
    })?;

    info!(%event_id, %entity_type, entity_id = %entity.id, forced = force, "Entity restored from event");

    Ok(RestoreResult {
        restored: true,
        entity_type,
        entity_id: entity.id.clone(),
        restored_from_event: event_id,
        entity,
        forced: force,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::query::EventFilter;
    use crate::entities::lifecycle::{permanent_delete, soft_delete};
    use crate::entities::mutations::{
        create_entity, get_entity, update_entity, CreateEntity, UpdateEntity,
    };
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    async fn latest_event(store: &MemoryStore) -> AuditEvent {
        store
            .list_events(&EventFilter::default(), None, 1)
            .await
            .unwrap()
            .remove(0)
    }

    async fn edit(store: &MemoryStore, id: &str, data: Value) -> Uuid {
        update_entity(
            store,
            EntityType::Prompt,
            id,
            UpdateEntity {
                data,
                action_type: None,
                actor: Actor::User,
            },
        )
        .await
        .unwrap();
        latest_event(store).await.id
    }

    /// P1 {title: A, status: draft}, then title -> B. Returns the update event id.
    async fn scenario(store: &MemoryStore) -> Uuid {
        create_entity(
            store,
            EntityType::Prompt,
            CreateEntity {
                id: Some("p1".to_string()),
                project_id: Some("proj".to_string()),
                data: json!({"title": "A", "status": "draft"}),
                actor: Actor::User,
            },
        )
        .await
        .unwrap();
        edit(store, "p1", json!({"title": "B"})).await
    }

    fn req(force: bool) -> RestoreRequest {
        RestoreRequest {
            force,
            actor: Actor::User,
        }
    }

    #[tokio::test]
    async fn test_restore_update_event_reverts_title() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;

        let result = restore_event(&store, ConflictScope::Full, update_id, req(false))
            .await
            .unwrap();
        assert!(result.restored);
        assert!(!result.forced);
        assert_eq!(result.restored_from_event, update_id);
        assert_eq!(result.entity.data, json!({"title": "A", "status": "draft"}));

        let restored = latest_event(&store).await;
        assert_eq!(restored.action_type, ActionType::Restored);
        assert_eq!(restored.metadata.before_state, None);
        assert_eq!(restored.metadata.after_state, Some(result.entity.data.clone()));
        assert_eq!(
            restored.metadata.extra.get("restored_from_event"),
            Some(&json!(update_id.to_string()))
        );
        assert!(restored.restorable_state().is_none(), "restored events are not restorable");
    }

    #[tokio::test]
    async fn test_unrelated_change_blocks_restore_in_full_scope() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;
        edit(&store, "p1", json!({"status": "ready"})).await;

        let err = restore_event(&store, ConflictScope::Full, update_id, req(false))
            .await
            .unwrap_err();
        let conflict = match err {
            AppError::Conflict(conflict) => conflict,
            other => panic!("expected a conflict, got {other:?}"),
        };
        assert_eq!(conflict.event_id, update_id);
        assert_eq!(
            conflict.conflicts,
            vec![FieldDiff {
                field: "status".to_string(),
                before: DiffValue::Value(json!("draft")),
                after: DiffValue::Value(json!("ready")),
            }]
        );

        let entity = get_entity(&store, EntityType::Prompt, "p1").await.unwrap();
        assert_eq!(entity.data, json!({"title": "B", "status": "ready"}), "no mutation on conflict");
        assert_ne!(latest_event(&store).await.action_type, ActionType::Restored);
    }

    #[tokio::test]
    async fn test_touched_scope_keeps_unrelated_change() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;
        edit(&store, "p1", json!({"status": "ready"})).await;

        let result = restore_event(&store, ConflictScope::Touched, update_id, req(false))
            .await
            .unwrap();
        assert_eq!(result.entity.data, json!({"title": "A", "status": "ready"}));
    }

    #[tokio::test]
    async fn test_touched_scope_still_blocks_on_same_field() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;
        edit(&store, "p1", json!({"title": "C"})).await;

        let result = restore_event(&store, ConflictScope::Touched, update_id, req(false)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_forced_restore_overrides_and_is_idempotent() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;
        edit(&store, "p1", json!({"status": "ready"})).await;

        let first = restore_event(&store, ConflictScope::Full, update_id, req(true))
            .await
            .unwrap();
        assert!(first.forced);
        let second = restore_event(&store, ConflictScope::Full, update_id, req(true))
            .await
            .unwrap();
        assert_eq!(first.entity.data, second.entity.data);
        assert_eq!(second.entity.data, json!({"title": "A", "status": "draft"}));
    }

    #[tokio::test]
    async fn test_create_event_is_not_restorable() {
        let store = MemoryStore::new();
        scenario(&store).await;
        let filter = EventFilter {
            entity_type: Some(EntityType::Prompt),
            entity_id: Some("p1".to_string()),
            ..Default::default()
        };
        let history = store.list_events(&filter, None, 10).await.unwrap();
        let create = history.last().unwrap();
        assert_eq!(create.action_type, ActionType::Create);

        let result = restore_event(&store, ConflictScope::Full, create.id, req(false)).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_unknown_or_purged_event_is_not_found() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;

        let missing = restore_event(&store, ConflictScope::Full, Uuid::new_v4(), req(false)).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        store.delete_event(update_id).await.unwrap();
        let purged = restore_event(&store, ConflictScope::Full, update_id, req(false)).await;
        assert!(matches!(purged, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_restoring_delete_event_untrashes() {
        let store = MemoryStore::new();
        scenario(&store).await;
        soft_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
        let delete_id = latest_event(&store).await.id;

        let result = restore_event(&store, ConflictScope::Full, delete_id, req(false))
            .await
            .unwrap();
        assert!(!result.entity.is_trashed());
        assert_eq!(result.entity.data, json!({"title": "B", "status": "draft"}));
        assert!(get_entity(&store, EntityType::Prompt, "p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_after_permanent_delete_is_not_found() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;
        soft_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
        permanent_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();

        let result = restore_event(&store, ConflictScope::Full, update_id, req(true)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_audit_append_aborts_restore() {
        let store = MemoryStore::new();
        let update_id = scenario(&store).await;

        store.fail_next_append();
        let result = restore_event(&store, ConflictScope::Full, update_id, req(false)).await;
        assert!(result.is_err());

        let entity = get_entity(&store, EntityType::Prompt, "p1").await.unwrap();
        assert_eq!(entity.data, json!({"title": "B", "status": "draft"}), "unaudited write leaked");
        assert_eq!(latest_event(&store).await.id, update_id);
    }

    async fn create_prompt(store: &MemoryStore, id: &str, data: Value) {
        create_entity(
            store,
            EntityType::Prompt,
            CreateEntity {
                id: Some(id.to_string()),
                project_id: Some("proj".to_string()),
                data,
                actor: Actor::User,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_restore_cannot_reintroduce_a_parent_cycle() {
        let store = MemoryStore::new();
        create_prompt(&store, "a", json!({"title": "a"})).await;
        create_prompt(&store, "b", json!({"title": "b"})).await;
        edit(&store, "b", json!({"parent_id": "a"})).await;
        let detach = edit(&store, "b", json!({"parent_id": null})).await;
        edit(&store, "a", json!({"parent_id": "b"})).await;

        for force in [false, true] {
            let result = restore_event(&store, ConflictScope::Full, detach, req(force)).await;
            assert!(matches!(result, Err(AppError::Validation(_))), "force={force}");
        }

        let a = get_entity(&store, EntityType::Prompt, "a").await.unwrap();
        let b = get_entity(&store, EntityType::Prompt, "b").await.unwrap();
        assert_eq!(a.data["parent_id"], json!("b"));
        assert!(b.data.get("parent_id").is_none());
    }

    #[tokio::test]
    async fn test_restore_may_move_prompt_when_tree_stays_acyclic() {
        let store = MemoryStore::new();
        create_prompt(&store, "a", json!({"title": "a"})).await;
        create_prompt(&store, "b", json!({"title": "b"})).await;
        edit(&store, "b", json!({"parent_id": "a"})).await;
        let detach = edit(&store, "b", json!({"parent_id": null})).await;

        let result = restore_event(&store, ConflictScope::Full, detach, req(false))
            .await
            .unwrap();
        assert_eq!(result.entity.data["parent_id"], json!("a"));
    }

    #[tokio::test]
    async fn test_non_object_before_state_is_not_restorable() {
        let store = MemoryStore::new();
        scenario(&store).await;
        // Written straight to the store, as legacy rows could be.
        let legacy = store
            .append_event(NewEvent {
                project_id: Some("proj".to_string()),
                entity_type: EntityType::Prompt,
                entity_id: "p1".to_string(),
                action_type: ActionType::Update,
                actor: Actor::System,
                metadata: EventMetadata::new(
                    Some(json!(["not", "an", "object"])),
                    Some(json!({"title": "B", "status": "draft"})),
                ),
            })
            .await
            .unwrap();

        let result = restore_event(&store, ConflictScope::Full, legacy.id, req(true)).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        let p1 = get_entity(&store, EntityType::Prompt, "p1").await.unwrap();
        assert_eq!(p1.data, json!({"title": "B", "status": "draft"}));
    }
}
