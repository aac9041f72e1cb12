//! Serialized checkpoint shapes.
//!
//! Persistence backends store [`PersistedCheckpoint`]s, a stable serde shape
//! decoupled from the in-memory [`Checkpoint`]. Conversions are lossless in
//! the save direction and validated in the load direction, so a corrupted or
//! hand-edited payload surfaces as a [`PersistenceError`] instead of a
//! mis-restored instance.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::checkpoint::{Checkpoint, Cursor};
use crate::graph::NodeId;
use crate::state::StateRecord;

/// Stable wire/storage form of a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub instance_id: String,
    /// Encoded cursor: `at:<node>`, `suspended:<node>`, or `done`.
    pub cursor: String,
    /// The state record as a JSON object.
    pub record: Value,
    pub step: u64,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Failures converting persisted shapes back into runtime types.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("malformed persisted cursor `{cursor}`")]
    #[diagnostic(code(harmonyspace::persistence::malformed_cursor))]
    MalformedCursor { cursor: String },

    #[error("persisted record for `{instance_id}` is not a JSON object")]
    #[diagnostic(code(harmonyspace::persistence::malformed_record))]
    MalformedRecord { instance_id: String },

    #[error("checkpoint payload could not be (de)serialized")]
    #[diagnostic(code(harmonyspace::persistence::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

fn encode_cursor(cursor: &Cursor) -> String {
    match cursor {
        Cursor::At(node) => format!("at:{}", node.encode()),
        Cursor::Suspended { node } => format!("suspended:{node}"),
        Cursor::Done => "done".into(),
    }
}

fn decode_cursor(text: &str) -> Result<Cursor, PersistenceError> {
    if text == "done" {
        return Ok(Cursor::Done);
    }
    if let Some(node) = text.strip_prefix("at:") {
        return Ok(Cursor::At(NodeId::decode(node)));
    }
    if let Some(node) = text.strip_prefix("suspended:") {
        return Ok(Cursor::Suspended {
            node: node.to_string(),
        });
    }
    Err(PersistenceError::MalformedCursor {
        cursor: text.to_string(),
    })
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            instance_id: checkpoint.instance_id.clone(),
            cursor: encode_cursor(&checkpoint.cursor),
            record: checkpoint.record.to_json(),
            step: checkpoint.step,
            sequence: checkpoint.sequence,
            created_at: checkpoint.created_at,
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(persisted: PersistedCheckpoint) -> Result<Self, Self::Error> {
        let cursor = decode_cursor(&persisted.cursor)?;
        let Value::Object(fields) = persisted.record else {
            return Err(PersistenceError::MalformedRecord {
                instance_id: persisted.instance_id,
            });
        };
        let mut record = StateRecord::default();
        for (field, value) in fields {
            record.set(field, value);
        }
        Ok(Self {
            instance_id: persisted.instance_id,
            cursor,
            record,
            step: persisted.step,
            sequence: persisted.sequence,
            created_at: persisted.created_at,
        })
    }
}
