use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

use crate::models::event::EntityType;

/// Raw `entities` row. All tracked entity kinds share one table; the
/// kind-specific fields live in `data`.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub entity_type: String,
    pub id: String,
    pub project_id: Option<String>,
    pub data: Value,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: String,
    pub project_id: Option<String>,
    pub data: Value,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The audited view of the entity: its fields, without bookkeeping columns.
    pub fn snapshot(&self) -> Value {
        self.data.clone()
    }

    /// The mutable part of the record, for building the next write.
    pub fn state(&self) -> EntityState {
        EntityState {
            project_id: self.project_id.clone(),
            data: self.data.clone(),
            deleted_at: self.deleted_at,
        }
    }
}

impl TryFrom<EntityRow> for EntityRecord {
    type Error = crate::errors::AppError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        Ok(EntityRecord {
            entity_type: row.entity_type.parse()?,
            id: row.id,
            project_id: row.project_id,
            data: row.data,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Desired mutable state of an entity after a write.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub project_id: Option<String>,
    pub data: Value,
    pub deleted_at: Option<DateTime<Utc>>,
}
