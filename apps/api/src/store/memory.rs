//! In-process store. One async mutex guards entities and the event log
//! together, so each `mutate_entity` call is trivially serializable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::query::{EventFilter, Watermark};
use crate::errors::AppError;
use crate::models::entity::{EntityRecord, EntityState};
use crate::models::event::{AuditEvent, EntityType, NewEvent};
use crate::store::{Committed, EntityWrite, MutationPlan, Store};

#[derive(Default)]
struct Inner {
    entities: HashMap<(EntityType, String), EntityRecord>,
    /// Append order; `seq` increases along the vector.
    events: Vec<AuditEvent>,
    next_seq: i64,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    /// Stamps an event without storing it. Timestamps never go backwards,
    /// even if the wall clock does.
    fn stamp(&mut self, event: NewEvent) -> AuditEvent {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(created_at);
        self.next_seq += 1;

        AuditEvent {
            id: Uuid::new_v4(),
            seq: self.next_seq,
            project_id: event.project_id,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action_type: event.action_type,
            actor: event.actor,
            metadata: event.metadata,
            created_at,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_next_append: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next event append fail as a storage error would.
    #[cfg(test)]
    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    fn check_append(&self) -> Result<(), AppError> {
        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "event log append failed"
            )));
        }
        Ok(())
    }
}

fn materialize(
    entity_type: EntityType,
    id: &str,
    state: EntityState,
    existing: Option<&EntityRecord>,
) -> EntityRecord {
    let now = Utc::now();
    EntityRecord {
        entity_type,
        id: id.to_string(),
        project_id: state.project_id,
        data: state.data,
        deleted_at: state.deleted_at,
        created_at: existing.map_or(now, |e| e.created_at),
        updated_at: now,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_event(&self, event: NewEvent) -> Result<AuditEvent, AppError> {
        let mut inner = self.inner.lock().await;
        self.check_append()?;
        let event = inner.stamp(event);
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        after: Option<&Watermark>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AppError> {
        let inner = self.inner.lock().await;
        let mut events: Vec<AuditEvent> = inner
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .filter(|e| after.map_or(true, |mark| mark.precedes(e)))
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        events.truncate(limit);
        Ok(events)
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        let before = inner.events.len();
        inner.events.retain(|e| e.id != id);
        Ok(inner.events.len() != before)
    }

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntityRecord>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.entities.get(&(entity_type, id.to_string())).cloned())
    }

    async fn list_entities(
        &self,
        entity_type: EntityType,
        project_id: Option<&str>,
        trashed: bool,
    ) -> Result<Vec<EntityRecord>, AppError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<EntityRecord> = inner
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .filter(|e| e.is_trashed() == trashed)
            .filter(|e| project_id.map_or(true, |p| e.project_id.as_deref() == Some(p)))
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(records)
    }

    async fn mutate_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        plan: MutationPlan,
    ) -> Result<Committed, AppError> {
        let mut inner = self.inner.lock().await;
        let key = (entity_type, id.to_string());
        let current = inner.entities.get(&key).cloned();

        let planned = plan(current.clone())?;

        // Stage the entity write; nothing is visible until the event append
        // below has also succeeded.
        let staged = match planned.write {
            EntityWrite::Insert(state) => {
                if current.is_some() {
                    return Err(AppError::Duplicate(format!("{entity_type} {id}")));
                }
                Some(Some(materialize(entity_type, id, state, None)))
            }
            EntityWrite::Update(state) => {
                let existing = current
                    .as_ref()
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {id}")))?;
                Some(Some(materialize(entity_type, id, state, Some(existing))))
            }
            EntityWrite::Erase => Some(None),
            EntityWrite::Keep => None,
        };

        let event = match planned.event {
            Some(new_event) => {
                self.check_append()?;
                Some(inner.stamp(new_event))
            }
            None => None,
        };

        let entity = match staged {
            Some(Some(record)) => {
                inner.entities.insert(key, record.clone());
                Some(record)
            }
            Some(None) => {
                inner.entities.remove(&key);
                None
            }
            None => current,
        };
        if let Some(event) = &event {
            inner.events.push(event.clone());
        }

        Ok(Committed { entity, event })
    }
}
