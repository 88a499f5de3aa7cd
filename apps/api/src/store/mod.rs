//! Persistence for entities and the audit event log.
//!
//! `AppState` holds an `Arc<dyn Store>`: Postgres in production, the
//! in-process store for tests and `STORE_BACKEND=memory`.
//!
//! Every entity write goes through `mutate_entity`, which pairs the write
//! with its audit event inside one transactional scope. There is no API for
//! writing an entity without going through it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::query::{EventFilter, Watermark};
use crate::errors::AppError;
use crate::models::entity::{EntityRecord, EntityState};
use crate::models::event::{AuditEvent, EntityType, NewEvent};

pub mod memory;
pub mod postgres;

/// What to do with the locked entity row.
#[derive(Debug, Clone)]
pub enum EntityWrite {
    /// Create the row. Fails with `Duplicate` if it already exists.
    Insert(EntityState),
    Update(EntityState),
    /// Hard delete. Irreversible.
    Erase,
    /// Leave the row as it is.
    Keep,
}

/// Output of a mutation plan: the entity write plus the event that audits it.
#[derive(Debug, Clone)]
pub struct Planned {
    pub write: EntityWrite,
    pub event: Option<NewEvent>,
}

impl Planned {
    pub fn audited(write: EntityWrite, event: NewEvent) -> Self {
        Self {
            write,
            event: Some(event),
        }
    }

    pub fn unchanged() -> Self {
        Self {
            write: EntityWrite::Keep,
            event: None,
        }
    }
}

/// Result of a committed mutation. `entity` is the authoritative post-write
/// state (`None` after an erase).
#[derive(Debug, Clone)]
pub struct Committed {
    pub entity: Option<EntityRecord>,
    pub event: Option<AuditEvent>,
}

/// Decides the write given the locked current row (`None` if absent).
/// Runs inside the transactional scope; returning `Err` rolls it back.
pub type MutationPlan =
    Box<dyn FnOnce(Option<EntityRecord>) -> Result<Planned, AppError> + Send>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Appends a standalone event (no entity write). Returns it with id,
    /// sequence and timestamp assigned.
    async fn append_event(&self, event: NewEvent) -> Result<AuditEvent, AppError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>, AppError>;

    /// Newest-first events matching `filter`, strictly older than `after`.
    async fn list_events(
        &self,
        filter: &EventFilter,
        after: Option<&Watermark>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AppError>;

    /// Administrative purge of one log entry. Returns false if absent.
    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError>;

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntityRecord>, AppError>;

    /// Active (`trashed = false`) or trashed entities of one type, oldest first.
    async fn list_entities(
        &self,
        entity_type: EntityType,
        project_id: Option<&str>,
        trashed: bool,
    ) -> Result<Vec<EntityRecord>, AppError>;

    /// Locks the entity, runs `plan` on its current state, then commits the
    /// planned write and event together or not at all.
    async fn mutate_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        plan: MutationPlan,
    ) -> Result<Committed, AppError>;
}
