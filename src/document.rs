//! Parsed-document access for the HarmonySpace compiler.
//!
//! The surface syntax parser is an external collaborator: this crate starts
//! from an already-parsed nested mapping/sequence tree ([`serde_json::Value`]).
//! This module provides the [`DocumentSet`] that keys subgraph documents by
//! their subgraph id (subgraph *file* resolution is delegated externally), and
//! a handful of access helpers shared by the validator and the graph builder.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Collection of parsed subgraph documents, keyed by the `source` name that
/// `subgraphs` entries reference.
///
/// The core never touches the filesystem; whoever parses the surface syntax
/// resolves subgraph files and hands the resulting trees over here.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    documents: FxHashMap<String, Value>,
}

impl DocumentSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed subgraph document under its source name.
    #[must_use]
    pub fn with_document(mut self, source: impl Into<String>, document: Value) -> Self {
        self.documents.insert(source.into(), document);
        self
    }

    pub fn insert(&mut self, source: impl Into<String>, document: Value) {
        self.documents.insert(source.into(), document);
    }

    #[must_use]
    pub fn get(&self, source: &str) -> Option<&Value> {
        self.documents.get(source)
    }

    #[must_use]
    pub fn contains(&self, source: &str) -> bool {
        self.documents.contains_key(source)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Fetch a string field from a mapping, if present.
pub(crate) fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Fetch a sequence field from a mapping, if present.
pub(crate) fn get_seq<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value.get(key).and_then(Value::as_array)
}

/// Fetch a nested mapping field, if present.
pub(crate) fn get_map<'a>(
    value: &'a Value,
    key: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    value.get(key).and_then(Value::as_object)
}

/// Walk a dotted key path (`config.streaming`) through nested mappings.
pub(crate) fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Human-readable name for a JSON value's type, used in diagnostics.
#[must_use]
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
