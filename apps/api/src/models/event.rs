use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Prompt,
    Conversation,
    Snippet,
    SnippetCollection,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Prompt => "prompt",
            EntityType::Conversation => "conversation",
            EntityType::Snippet => "snippet",
            EntityType::SnippetCollection => "snippet_collection",
        }
    }

    /// Resolves the plural URL segment used by the entity routes.
    pub fn from_path_segment(segment: &str) -> Result<Self, AppError> {
        match segment {
            "projects" => Ok(EntityType::Project),
            "prompts" => Ok(EntityType::Prompt),
            "conversations" => Ok(EntityType::Conversation),
            "snippets" => Ok(EntityType::Snippet),
            "collections" => Ok(EntityType::SnippetCollection),
            other => Err(AppError::NotFound(format!("Unknown entity kind '{other}'"))),
        }
    }

    /// Only the primary entities carry `deleted_at` and live in the trash.
    pub fn is_soft_deletable(&self) -> bool {
        !matches!(self, EntityType::Conversation)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(EntityType::Project),
            "prompt" => Ok(EntityType::Prompt),
            "conversation" => Ok(EntityType::Conversation),
            "snippet" => Ok(EntityType::Snippet),
            "snippet_collection" => Ok(EntityType::SnippetCollection),
            other => Err(AppError::Validation(format!("Unknown entity_type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    StatusChange,
    Reorder,
    Execute,
    Restored,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::StatusChange => "status_change",
            ActionType::Reorder => "reorder",
            ActionType::Execute => "execute",
            ActionType::Restored => "restored",
        }
    }
}

impl FromStr for ActionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ActionType::Create),
            "update" => Ok(ActionType::Update),
            "delete" => Ok(ActionType::Delete),
            "status_change" => Ok(ActionType::StatusChange),
            "reorder" => Ok(ActionType::Reorder),
            "execute" => Ok(ActionType::Execute),
            "restored" => Ok(ActionType::Restored),
            other => Err(AppError::Validation(format!("Unknown action_type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    #[default]
    User,
    System,
    Llm,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::System => "system",
            Actor::Llm => "llm",
        }
    }
}

impl FromStr for Actor {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Actor::User),
            "system" => Ok(Actor::System),
            "llm" => Ok(Actor::Llm),
            other => Err(AppError::Validation(format!("Unknown actor '{other}'"))),
        }
    }
}

/// Snapshot pair plus any producer-specific fields (`restored_from_event`,
/// `permanent`, ...). Stored as a single jsonb column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub before_state: Option<Value>,
    #[serde(default)]
    pub after_state: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventMetadata {
    pub fn new(before_state: Option<Value>, after_state: Option<Value>) -> Self {
        Self {
            before_state,
            after_state,
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// An event that has not been persisted yet. The store assigns id, sequence
/// and timestamp at append time.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub project_id: Option<String>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action_type: ActionType,
    pub actor: Actor,
    pub metadata: EventMetadata,
}

/// Raw `audit_events` row.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub seq: i64,
    pub id: Uuid,
    pub project_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action_type: String,
    pub actor: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    #[serde(skip)]
    pub seq: i64,
    pub project_id: Option<String>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action_type: ActionType,
    pub actor: Actor,
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// The snapshot a restore would write back, if this event has one.
    /// `null` and `{}` both count as "nothing to restore".
    pub fn restorable_state(&self) -> Option<&Value> {
        match &self.metadata.before_state {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(state) => Some(state),
        }
    }
}

impl TryFrom<EventRow> for AuditEvent {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let metadata: EventMetadata = serde_json::from_value(row.metadata).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Corrupt metadata on event {}: {e}", row.id))
        })?;
        Ok(AuditEvent {
            id: row.id,
            seq: row.seq,
            project_id: row.project_id,
            entity_type: row.entity_type.parse()?,
            entity_id: row.entity_id,
            action_type: row.action_type.parse()?,
            actor: row.actor.parse()?,
            metadata,
            created_at: row.created_at,
        })
    }
}
