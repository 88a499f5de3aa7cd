//! Field-level diff between two entity snapshots.
//!
//! Pure and deterministic. Values are compared as `serde_json::Value`, whose
//! objects are key-ordered maps: object key order never matters, array order
//! always does. A key present on only one side is reported against
//! `DiffValue::Undefined`, which is distinct from an explicit JSON `null`.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One side of a field comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DiffValue {
    /// The field does not exist on this side.
    #[default]
    Undefined,
    Value(Value),
}

impl DiffValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, DiffValue::Undefined)
    }

    fn from_field(map: &Map<String, Value>, key: &str) -> Self {
        map.get(key)
            .cloned()
            .map(DiffValue::Value)
            .unwrap_or(DiffValue::Undefined)
    }
}

// On the wire an undefined side is an absent key (see `FieldDiff`), so only
// the `Value` arm is ever serialized.
impl Serialize for DiffValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DiffValue::Undefined => serializer.serialize_unit(),
            DiffValue::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DiffValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(DiffValue::Value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    #[serde(default, skip_serializing_if = "DiffValue::is_undefined")]
    pub before: DiffValue,
    #[serde(default, skip_serializing_if = "DiffValue::is_undefined")]
    pub after: DiffValue,
}

/// Computes the fields that differ between `before` and `after`.
///
/// Results are sorted by field name. Non-object snapshots (including `null`
/// for create/delete events) are treated as having no fields.
pub fn diff(before: &Value, after: &Value) -> Vec<FieldDiff> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter(|key| before.get(*key) != after.get(*key))
        .map(|key| FieldDiff {
            field: key.clone(),
            before: DiffValue::from_field(before, key),
            after: DiffValue::from_field(after, key),
        })
        .collect()
}

/// Diffs two optional snapshots, treating a missing snapshot as empty.
pub fn diff_snapshots(before: Option<&Value>, after: Option<&Value>) -> Vec<FieldDiff> {
    diff(before.unwrap_or(&Value::Null), after.unwrap_or(&Value::Null))
}

/// Field names reported by a diff.
pub fn changed_fields(diffs: &[FieldDiff]) -> BTreeSet<String> {
    diffs.iter().map(|d| d.field.clone()).collect()
}
