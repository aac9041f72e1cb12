//! State records and deltas for workflow instances.
//!
//! A [`StateRecord`] is the mutable, schema-shaped data threaded through one
//! workflow instance. It is created from schema defaults at instance start,
//! read by condition evaluation, and written exclusively by applying
//! [`StateDelta`]s produced by node execution and reducers; the engine never
//! mutates it outside a delta application.
//!
//! # Merge Rules
//!
//! Applying a delta merges field by field:
//! - list fields **append** the delta's items
//! - object fields **shallow-merge** key by key (recursively, same rules)
//! - scalar fields **overwrite**
//!
//! # Examples
//!
//! ```rust
//! use harmonyspace::state::{StateDelta, StateRecord};
//! use serde_json::json;
//!
//! let mut record = StateRecord::default();
//! record.set("messages", json!(["hello"]));
//! record.set("solution_confidence", json!(0.4));
//!
//! let delta = StateDelta::new()
//!     .with_field("messages", json!(["world"]))
//!     .with_field("solution_confidence", json!(0.9));
//! record.apply(&delta);
//!
//! assert_eq!(record.get_path("messages"), Some(&json!(["hello", "world"])));
//! assert_eq!(record.get_path("solution_confidence"), Some(&json!(0.9)));
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutable state of one running workflow instance.
///
/// Shaped by its [`StateSchema`](crate::schema::StateSchema); exclusively
/// owned by that instance's execution. The compiled graph never holds one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    fields: FxHashMap<String, Value>,
}

/// A partial state update produced by node execution or by a reducer.
///
/// Field names are top-level schema fields; values follow the merge rules
/// documented on [`StateRecord::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    fields: FxHashMap<String, Value>,
}

impl StateRecord {
    #[must_use]
    pub fn new(fields: FxHashMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Direct field write, bypassing merge rules. Used when materializing a
    /// record from schema defaults or a restored checkpoint.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Read a value by dotted path (`agent_selection.agent_id`).
    ///
    /// Returns `None` when any path segment is absent or a non-object value
    /// is traversed into.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Apply a delta using the field-level merge rules: lists append, objects
    /// shallow-merge, scalars overwrite.
    pub fn apply(&mut self, delta: &StateDelta) {
        for (field, incoming) in delta.iter() {
            match self.fields.get_mut(field) {
                Some(existing) => merge_value(existing, incoming),
                None => {
                    self.fields.insert(field.clone(), incoming.clone());
                }
            }
        }
    }

    /// Compute the delta that transforms `baseline` into `self`: every
    /// top-level field whose value differs (or is newly present).
    ///
    /// Used by subgraph execution, which returns the changed fields of its
    /// terminal record as the delta applied to the parent instance. List
    /// fields carry only the appended suffix when the baseline list is a
    /// prefix of the new list, so re-applying through the merge rules does
    /// not duplicate items.
    #[must_use]
    pub fn diff_from(&self, baseline: &StateRecord) -> StateDelta {
        let mut delta = StateDelta::new();
        for (field, value) in &self.fields {
            match baseline.fields.get(field) {
                Some(previous) if previous == value => {}
                Some(Value::Array(previous)) => {
                    if let Value::Array(current) = value
                        && current.len() >= previous.len()
                        && current[..previous.len()] == previous[..]
                    {
                        delta.set(field.clone(), Value::Array(current[previous.len()..].to_vec()));
                    } else {
                        delta.set(field.clone(), value.clone());
                    }
                }
                _ => delta.set(field.clone(), value.clone()),
            }
        }
        delta
    }

    #[must_use]
    pub fn fields(&self) -> &FxHashMap<String, Value> {
        &self.fields
    }

    /// Project the record into a plain JSON object, e.g. for stream payloads.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl StateDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Fold another delta into this one using the same merge rules a record
    /// applies. Used by the `merge` reducer to combine branch results in
    /// declared branch order.
    pub fn merge(&mut self, other: &StateDelta) {
        for (field, incoming) in other.iter() {
            match self.fields.get_mut(field) {
                Some(existing) => merge_value(existing, incoming),
                None => {
                    self.fields.insert(field.clone(), incoming.clone());
                }
            }
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for StateDelta {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Merge `incoming` into `existing` in place: list/list appends, object/object
/// shallow-merges, anything else overwrites.
fn merge_value(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Array(current), Value::Array(additions)) => {
            current.extend(additions.iter().cloned());
        }
        (Value::Object(current), Value::Object(additions)) => {
            for (key, value) in additions {
                match current.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
