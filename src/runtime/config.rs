//! Runtime configuration resolved from the document's `config` block.

use std::time::Duration;

use serde_json::Value;

use crate::document::get_path;
use crate::streaming::StreamMode;

/// Persistence backend kinds a document may request.
///
/// Only `memory` ships a backend in this crate; the other kinds name external
/// [`CheckpointStore`](crate::runtime::CheckpointStore) implementations the
/// host wires in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistenceKind {
    #[default]
    Memory,
    KeyedStore,
    Relational,
    Document,
}

impl PersistenceKind {
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "memory" => Some(Self::Memory),
            "keyed_store" => Some(Self::KeyedStore),
            "relational" => Some(Self::Relational),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::KeyedStore => "keyed_store",
            Self::Relational => "relational",
            Self::Document => "document",
        }
    }
}

/// Engine configuration: checkpoint cadence, checkpoint TTL, stream mode and
/// node-subset filter.
///
/// Resolution order: document `config` block, then environment overrides
/// (`HARMONYSPACE_CHECKPOINT_INTERVAL`, `HARMONYSPACE_CHECKPOINT_TTL_SECONDS`,
/// `HARMONYSPACE_STREAM_MODE`), loaded through `dotenvy` so a local `.env`
/// participates.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub persistence: PersistenceKind,
    /// Steps between interval checkpoints. Suspension, termination, and
    /// parallel reduction always checkpoint regardless.
    pub checkpoint_interval: u64,
    pub checkpoint_ttl: Option<Duration>,
    pub stream_mode: StreamMode,
    /// Restrict node-bound stream events to this subset. `None` streams all
    /// nodes; lifecycle events always pass.
    pub stream_nodes: Option<Vec<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceKind::Memory,
            checkpoint_interval: 1,
            checkpoint_ttl: None,
            stream_mode: StreamMode::default(),
            stream_nodes: None,
        }
    }
}

impl RuntimeConfig {
    /// Read the `config` block of a validated document and apply environment
    /// overrides.
    #[must_use]
    pub fn from_document(document: &Value) -> Self {
        let mut config = Self::default();

        if let Some(persistence) = get_path(document, "config.persistence") {
            if let Some(kind) = persistence
                .get("type")
                .and_then(Value::as_str)
                .and_then(PersistenceKind::parse)
            {
                config.persistence = kind;
            }
            if let Some(interval) = persistence.get("interval").and_then(Value::as_u64) {
                config.checkpoint_interval = interval.max(1);
            }
            if let Some(ttl) = persistence.get("ttl_seconds").and_then(Value::as_u64) {
                config.checkpoint_ttl = Some(Duration::from_secs(ttl));
            }
        }

        if let Some(streaming) = get_path(document, "config.streaming") {
            if let Some(mode) = streaming
                .get("mode")
                .and_then(Value::as_str)
                .and_then(StreamMode::parse)
            {
                config.stream_mode = mode;
            }
            if let Some(nodes) = streaming.get("nodes").and_then(Value::as_array) {
                config.stream_nodes = Some(
                    nodes
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect(),
                );
            }
        }

        config.apply_env_overrides()
    }

    fn apply_env_overrides(mut self) -> Self {
        dotenvy::dotenv().ok();

        if let Ok(interval) = std::env::var("HARMONYSPACE_CHECKPOINT_INTERVAL")
            && let Ok(interval) = interval.parse::<u64>()
        {
            self.checkpoint_interval = interval.max(1);
        }
        if let Ok(ttl) = std::env::var("HARMONYSPACE_CHECKPOINT_TTL_SECONDS")
            && let Ok(ttl) = ttl.parse::<u64>()
        {
            self.checkpoint_ttl = Some(Duration::from_secs(ttl));
        }
        if let Ok(mode) = std::env::var("HARMONYSPACE_STREAM_MODE")
            && let Some(mode) = StreamMode::parse(&mode)
        {
            self.stream_mode = mode;
        }

        self
    }

    /// Whether a node-bound event for this node passes the subset filter.
    #[must_use]
    pub fn streams_node(&self, node_id: &str) -> bool {
        self.stream_nodes
            .as_ref()
            .is_none_or(|nodes| nodes.iter().any(|allowed| allowed == node_id))
    }
}
