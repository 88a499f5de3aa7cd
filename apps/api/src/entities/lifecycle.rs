//! Trash lifecycle shared by projects, prompts, snippets and collections.
//!
//! active --delete--> trashed --restore--> active
//!                    trashed --permanent_delete--> gone (terminal)
//!
//! Each transition and its audit event commit together. Deleting a project
//! does not touch its prompts: children stay independently trashable.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::entity::EntityRecord;
use crate::models::event::{ActionType, Actor, EntityType, EventMetadata, NewEvent};
use crate::store::{EntityWrite, Planned, Store};

#[derive(Debug, Serialize)]
pub struct PurgeResult {
    pub deleted: bool,
    pub entity_type: EntityType,
    pub entity_id: String,
}

fn require_soft_deletable(entity_type: EntityType) -> Result<(), AppError> {
    if entity_type.is_soft_deletable() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{entity_type} entities do not support the trash lifecycle"
        )))
    }
}

fn lifecycle_event(
    record: &EntityRecord,
    action_type: ActionType,
    actor: Actor,
    metadata: EventMetadata,
) -> NewEvent {
    NewEvent {
        project_id: record.project_id.clone(),
        entity_type: record.entity_type,
        entity_id: record.id.clone(),
        action_type,
        actor,
        metadata,
    }
}

/// Moves an active entity to the trash and emits `delete` (after = null).
pub async fn soft_delete(
    store: &dyn Store,
    entity_type: EntityType,
    id: &str,
    actor: Actor,
) -> Result<EntityRecord, AppError> {
    require_soft_deletable(entity_type)?;

    let entity_id = id.to_string();
    let committed = store
        .mutate_entity(
            entity_type,
            id,
            Box::new(move |current| {
                let current = current
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {entity_id}")))?;
                if current.is_trashed() {
                    return Err(AppError::InvalidState(format!(
                        "{entity_type} {entity_id} is already in the trash"
                    )));
                }
                let event = lifecycle_event(
                    &current,
                    ActionType::Delete,
                    actor,
                    EventMetadata::new(Some(current.snapshot()), None),
                );
                let mut state = current.state();
                state.deleted_at = Some(Utc::now());
                Ok(Planned::audited(EntityWrite::Update(state), event))
            }),
        )
        .await?;

    info!(%entity_type, entity_id = id, "Entity moved to trash");
    committed
        .entity
        .ok_or_else(|| AppError::NotFound(format!("{entity_type} {id}")))
}

pub async fn list_deleted(
    store: &dyn Store,
    entity_type: EntityType,
    project_id: Option<&str>,
) -> Result<Vec<EntityRecord>, AppError> {
    require_soft_deletable(entity_type)?;
    store.list_entities(entity_type, project_id, true).await
}

/// Takes an entity out of the trash. Restoring an active entity is a no-op
/// and emits nothing.
pub async fn restore_entity(
    store: &dyn Store,
    entity_type: EntityType,
    id: &str,
    actor: Actor,
) -> Result<EntityRecord, AppError> {
    require_soft_deletable(entity_type)?;

    let entity_id = id.to_string();
    let committed = store
        .mutate_entity(
            entity_type,
            id,
            Box::new(move |current| {
                let current = current
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {entity_id}")))?;
                if !current.is_trashed() {
                    return Ok(Planned::unchanged());
                }
                let event = lifecycle_event(
                    &current,
                    ActionType::Restored,
                    actor,
                    EventMetadata::new(None, Some(current.snapshot())).with("restored_from_trash", true),
                );
                let mut state = current.state();
                state.deleted_at = None;
                Ok(Planned::audited(EntityWrite::Update(state), event))
            }),
        )
        .await?;

    if committed.event.is_some() {
        info!(%entity_type, entity_id = id, "Entity restored from trash");
    }
    committed
        .entity
        .ok_or_else(|| AppError::NotFound(format!("{entity_type} {id}")))
}

/// Erases a trashed entity for good. Its past events stay in the log and
/// keep pointing at the now-unresolvable id.
pub async fn permanent_delete(
    store: &dyn Store,
    entity_type: EntityType,
    id: &str,
    actor: Actor,
) -> Result<PurgeResult, AppError> {
    require_soft_deletable(entity_type)?;

    let entity_id = id.to_string();
    store
        .mutate_entity(
            entity_type,
            id,
            Box::new(move |current| {
                let current = current
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {entity_id}")))?;
                if !current.is_trashed() {
                    return Err(AppError::InvalidState(format!(
                        "{entity_type} {entity_id} must be in the trash before permanent deletion"
                    )));
                }
                let event = lifecycle_event(
                    &current,
                    ActionType::Delete,
                    actor,
                    EventMetadata::new(Some(current.snapshot()), None).with("permanent", true),
                );
                Ok(Planned::audited(EntityWrite::Erase, event))
            }),
        )
        .await?;

    info!(%entity_type, entity_id = id, "Entity permanently deleted");
    Ok(PurgeResult {
        deleted: true,
        entity_type,
        entity_id: id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::query::EventFilter;
    use crate::entities::mutations::{create_entity, get_entity, list_entities, CreateEntity};
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    async fn seed(store: &MemoryStore, entity_type: EntityType, id: &str, project_id: &str) {
        create_entity(
            store,
            entity_type,
            CreateEntity {
                id: Some(id.to_string()),
                project_id: Some(project_id.to_string()),
                data: json!({"title": id}),
                actor: Actor::User,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_deleted_entity_leaves_list_and_enters_trash() {
        let store = MemoryStore::new();
        seed(&store, EntityType::Prompt, "p1", "proj").await;
        seed(&store, EntityType::Prompt, "p2", "proj").await;

        let trashed = soft_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
        assert!(trashed.is_trashed());

        let active = list_entities(&store, EntityType::Prompt, Some("proj")).await.unwrap();
        assert_eq!(active.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["p2"]);
        let deleted = list_deleted(&store, EntityType::Prompt, Some("proj")).await.unwrap();
        assert_eq!(deleted.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["p1"]);
        assert!(matches!(
            get_entity(&store, EntityType::Prompt, "p1").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_event_has_full_before_and_null_after() {
        let store = MemoryStore::new();
        seed(&store, EntityType::Snippet, "s1", "proj").await;
        soft_delete(&store, EntityType::Snippet, "s1", Actor::User).await.unwrap();

        let events = store.list_events(&EventFilter::default(), None, 1).await.unwrap();
        assert_eq!(events[0].action_type, ActionType::Delete);
        assert_eq!(events[0].metadata.before_state, Some(json!({"title": "s1"})));
        assert_eq!(events[0].metadata.after_state, None);
    }

    #[tokio::test]
    async fn test_deleting_twice_is_invalid_state() {
        let store = MemoryStore::new();
        seed(&store, EntityType::Snippet, "s1", "proj").await;
        soft_delete(&store, EntityType::Snippet, "s1", Actor::User).await.unwrap();
        assert!(matches!(
            soft_delete(&store, EntityType::Snippet, "s1", Actor::User).await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_is_idempotent_on_active_entity() {
        let store = MemoryStore::new();
        seed(&store, EntityType::SnippetCollection, "c1", "proj").await;
        soft_delete(&store, EntityType::SnippetCollection, "c1", Actor::User).await.unwrap();

        let restored = restore_entity(&store, EntityType::SnippetCollection, "c1", Actor::User)
            .await
            .unwrap();
        assert!(!restored.is_trashed());
        let again = restore_entity(&store, EntityType::SnippetCollection, "c1", Actor::User)
            .await
            .unwrap();
        assert_eq!(again, restored);

        let events = store.list_events(&EventFilter::default(), None, 10).await.unwrap();
        let restored_events: Vec<_> = events
            .iter()
            .filter(|e| e.action_type == ActionType::Restored)
            .collect();
        assert_eq!(restored_events.len(), 1, "second restore must not emit");
        assert_eq!(restored_events[0].metadata.before_state, None);
        assert_eq!(
            restored_events[0].metadata.extra.get("restored_from_trash"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn test_permanent_delete_requires_trash_and_is_terminal() {
        let store = MemoryStore::new();
        seed(&store, EntityType::Prompt, "p1", "proj").await;

        assert!(matches!(
            permanent_delete(&store, EntityType::Prompt, "p1", Actor::User).await,
            Err(AppError::InvalidState(_))
        ));

        soft_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
        let purged = permanent_delete(&store, EntityType::Prompt, "p1", Actor::User)
            .await
            .unwrap();
        assert!(purged.deleted);

        assert!(matches!(
            restore_entity(&store, EntityType::Prompt, "p1", Actor::User).await,
            Err(AppError::NotFound(_))
        ));
        assert!(list_deleted(&store, EntityType::Prompt, None).await.unwrap().is_empty());

        let filter = EventFilter {
            entity_type: Some(EntityType::Prompt),
            entity_id: Some("p1".to_string()),
            ..Default::default()
        };
        let history = store.list_events(&filter, None, 10).await.unwrap();
        assert_eq!(history.len(), 3, "create, delete and purge events survive");
        assert_eq!(history[0].metadata.extra.get("permanent"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_project_delete_does_not_cascade() {
        let store = MemoryStore::new();
        seed(&store, EntityType::Project, "proj", "proj").await;
        seed(&store, EntityType::Prompt, "p1", "proj").await;

        soft_delete(&store, EntityType::Project, "proj", Actor::User).await.unwrap();
        permanent_delete(&store, EntityType::Project, "proj", Actor::User).await.unwrap();

        let prompt = get_entity(&store, EntityType::Prompt, "p1").await.unwrap();
        assert_eq!(prompt.project_id.as_deref(), Some("proj"));
        soft_delete(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
        restore_entity(&store, EntityType::Prompt, "p1", Actor::User).await.unwrap();
    }

    #[tokio::test]
    async fn test_conversations_have_no_trash() {
        let store = MemoryStore::new();
        assert!(matches!(
            list_deleted(&store, EntityType::Conversation, None).await,
            Err(AppError::Validation(_))
        ));
    }
}
