//! Checkpoint snapshots and the store port.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use super::persistence::PersistenceError;
use crate::graph::NodeId;
use crate::state::StateRecord;

/// Where execution resumes from after a restore.
#[derive(Clone, Debug, PartialEq)]
pub enum Cursor {
    /// Ready to execute this node (or terminate at the marker).
    At(NodeId),
    /// Suspended at a human-integration node; allowed actions are recovered
    /// from the compiled graph on restore.
    Suspended { node: String },
    /// The instance has settled.
    Done,
}

/// A durable snapshot of one instance: enough to resume execution exactly
/// where it left off.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub instance_id: String,
    pub cursor: Cursor,
    pub record: StateRecord,
    /// Completed node executions at snapshot time.
    pub step: u64,
    /// Monotonic per instance; a restore continues the sequence.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Failures of a checkpoint backend.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint backend failure: {message}")]
    #[diagnostic(code(harmonyspace::checkpoint::backend))]
    Backend { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Persistence port for checkpoints.
///
/// The engine awaits `save` inside its step loop, after the delta is applied
/// and before any later event is emitted, so an observer never sees progress
/// that could not be restored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist (replacing any previous checkpoint of the same instance).
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// Latest checkpoint of an instance, if one survives.
    async fn load(&self, instance_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    async fn delete(&self, instance_id: &str) -> Result<(), CheckpointError>;

    /// Ids of every instance with a surviving checkpoint.
    async fn list_instances(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Reference implementation of the store port. Volatile; honors an optional
/// TTL by sweeping expired entries on every access.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<FxHashMap<String, Checkpoint>>,
    ttl: Option<Duration>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            checkpoints: Mutex::new(FxHashMap::default()),
            ttl: Some(ttl),
        }
    }

    fn sweep(&self, checkpoints: &mut FxHashMap<String, Checkpoint>) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return;
        };
        let horizon = Utc::now() - ttl;
        checkpoints.retain(|_, checkpoint| checkpoint.created_at >= horizon);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.lock().await;
        self.sweep(&mut checkpoints);
        checkpoints.insert(checkpoint.instance_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let mut checkpoints = self.checkpoints.lock().await;
        self.sweep(&mut checkpoints);
        Ok(checkpoints.get(instance_id).cloned())
    }

    async fn delete(&self, instance_id: &str) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.lock().await;
        checkpoints.remove(instance_id);
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<String>, CheckpointError> {
        let mut checkpoints = self.checkpoints.lock().await;
        self.sweep(&mut checkpoints);
        let mut ids: Vec<String> = checkpoints.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(instance_id: &str, sequence: u64) -> Checkpoint {
        let mut record = StateRecord::default();
        record.set("x", json!(sequence));
        Checkpoint {
            instance_id: instance_id.into(),
            cursor: Cursor::At(NodeId::Named("router".into())),
            record,
            step: sequence,
            sequence,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_replaces_and_load_returns_latest() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint("wf", 1)).await.unwrap();
        store.save(checkpoint("wf", 2)).await.unwrap();
        let loaded = store.load("wf").await.unwrap().unwrap();
        assert_eq!(loaded.sequence, 2);
        assert_eq!(store.list_instances().await.unwrap(), vec!["wf"]);
    }

    #[tokio::test]
    async fn delete_forgets_the_instance() {
        let store = InMemoryCheckpointStore::new();
        store.save(checkpoint("wf", 1)).await.unwrap();
        store.delete("wf").await.unwrap();
        assert!(store.load("wf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_sweeps_expired_checkpoints() {
        let store = InMemoryCheckpointStore::with_ttl(Duration::from_secs(60));
        let mut old = checkpoint("stale", 1);
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        store.save(old).await.unwrap();
        store.save(checkpoint("live", 1)).await.unwrap();
        assert_eq!(store.list_instances().await.unwrap(), vec!["live"]);
        assert!(store.load("stale").await.unwrap().is_none());
    }
}
