//! Conflict detection for event-level restores.
//!
//! Instead of a version counter, the live entity is compared against the
//! state the event left behind. Any difference means somebody wrote to the
//! entity after the event, and restoring would silently discard that write.

use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::audit::diff::{changed_fields, diff, diff_snapshots, FieldDiff};
use crate::models::event::{ActionType, AuditEvent};

/// Which fields participate in conflict detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictScope {
    /// Every field of the expected post-state is compared. An unrelated
    /// change (e.g. a status flip) blocks restoring a title edit.
    #[default]
    Full,
    /// Only the fields the event itself changed are compared.
    Touched,
}

impl FromStr for ConflictScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ConflictScope::Full),
            "touched" => Ok(ConflictScope::Touched),
            other => anyhow::bail!("CONFLICT_SCOPE must be 'full' or 'touched', got '{other}'"),
        }
    }
}

/// What the live entity should look like if nothing happened since `event`.
///
/// A delete leaves the fields untouched and only moves the entity to the
/// trash, so its expected state is the before-snapshot.
pub fn expected_state(event: &AuditEvent) -> Option<&Value> {
    match event.action_type {
        ActionType::Delete => event.metadata.before_state.as_ref(),
        _ => event.metadata.after_state.as_ref(),
    }
}

/// Returns the fields where `current` diverges from the event's expected
/// post-state. Each diff reads `before = expected`, `after = current`.
pub fn detect(event: &AuditEvent, current: &Value, scope: ConflictScope) -> Vec<FieldDiff> {
    let expected = expected_state(event).unwrap_or(&Value::Null);
    let conflicts = diff(expected, current);

    match scope {
        ConflictScope::Full => conflicts,
        ConflictScope::Touched => {
            if event.action_type == ActionType::Delete {
                return conflicts;
            }
            let touched = changed_fields(&diff_snapshots(
                event.metadata.before_state.as_ref(),
                event.metadata.after_state.as_ref(),
            ));
            conflicts
                .into_iter()
                .filter(|c| touched.contains(&c.field))
                .collect()
        }
    }
}
