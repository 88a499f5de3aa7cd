//! Prompt parent/child trees.
//!
//! A prompt names its parent through `data.parent_id`. The tree is checked
//! over an arena of `id -> parent_id` rather than live references, and every
//! ancestor walk is bounded by the arena size so corrupt data cannot loop.

use std::collections::HashMap;

use serde_json::Value;

use crate::errors::AppError;
use crate::models::entity::EntityRecord;
use crate::models::event::EntityType;
use crate::store::Store;

pub const PARENT_FIELD: &str = "parent_id";

/// Reads `parent_id` from prompt data. Absent and `null` both mean "root".
pub fn parent_of(data: &Value) -> Result<Option<&str>, AppError> {
    match data.get(PARENT_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.as_str())),
        Some(other) => Err(AppError::Validation(format!(
            "{PARENT_FIELD} must be a string or null, got {other}"
        ))),
    }
}

#[derive(Debug, Default)]
pub struct PromptArena {
    parents: HashMap<String, Option<String>>,
}

impl PromptArena {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EntityRecord>) -> Self {
        let parents = records
            .into_iter()
            .map(|r| {
                let parent = parent_of(&r.data).ok().flatten().map(str::to_string);
                (r.id.clone(), parent)
            })
            .collect();
        Self { parents }
    }

    /// Checks that hanging `id` under `new_parent` keeps the forest acyclic.
    pub fn check_reparent(&self, id: &str, new_parent: Option<&str>) -> Result<(), AppError> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == id {
            return Err(AppError::Validation(format!(
                "Prompt {id} cannot be its own parent"
            )));
        }
        if !self.parents.contains_key(parent) {
            return Err(AppError::Validation(format!(
                "Parent prompt {parent} does not exist in this project"
            )));
        }

        let mut cursor = Some(parent);
        let mut steps = 0usize;
        while let Some(node) = cursor {
            if node == id {
                return Err(AppError::Validation(format!(
                    "Moving prompt {id} under {parent} would create a cycle"
                )));
            }
            steps += 1;
            if steps > self.parents.len() {
                return Err(AppError::Validation(format!(
                    "Ancestor chain of {parent} does not terminate"
                )));
            }
            cursor = self.parents.get(node).and_then(|p| p.as_deref());
        }
        Ok(())
    }
}

/// Builds the arena for one project. Trashed prompts are included, since
/// they can be restored into the tree.
pub async fn load_arena(store: &dyn Store, project_id: Option<&str>) -> Result<PromptArena, AppError> {
    let mut records = store
        .list_entities(EntityType::Prompt, project_id, false)
        .await?;
    records.extend(
        store
            .list_entities(EntityType::Prompt, project_id, true)
            .await?,
    );
    Ok(PromptArena::from_records(&records))
}

/// Validates the proposed parent against the project's current tree.
pub async fn validate_parent(
    store: &dyn Store,
    project_id: Option<&str>,
    id: &str,
    new_parent: Option<&str>,
) -> Result<(), AppError> {
    if new_parent.is_none() {
        return Ok(());
    }
    load_arena(store, project_id)
        .await?
        .check_reparent(id, new_parent)
}
