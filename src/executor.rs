//! The node executor port.
//!
//! Agent bodies (LLM calls, tool use, plain functions) live outside this
//! crate. The engine hands each agent node, a snapshot of the current state,
//! and an [`ExecutorContext`] to an implementation of [`NodeExecutor`] and
//! applies the returned [`StateDelta`]. A returned error faults the instance;
//! the last persisted checkpoint stays valid.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::graph::AgentNode;
use crate::state::{StateDelta, StateRecord};
use crate::streaming::{EventEmitter, StreamEvent, StreamEventKind, StreamMode};

/// Execution context for one node invocation.
#[derive(Clone, Debug)]
pub struct ExecutorContext {
    pub instance_id: String,
    pub node_id: String,
    pub step: u64,
    mode: StreamMode,
    emitter: Option<EventEmitter>,
}

impl ExecutorContext {
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        node_id: impl Into<String>,
        step: u64,
        mode: StreamMode,
        emitter: Option<EventEmitter>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_id: node_id.into(),
            step,
            mode,
            emitter,
        }
    }

    /// Stream a whole message from inside an invocation. A no-op unless the
    /// stream mode is `messages` and the node passes the subset filter.
    pub fn emit_message(&self, text: impl Into<String>) {
        if self.mode != StreamMode::Messages {
            return;
        }
        self.emit(StreamEventKind::Message {
            node_id: self.node_id.clone(),
            step: self.step,
            text: text.into(),
        });
    }

    /// Stream a token chunk from inside an invocation. A no-op unless the
    /// stream mode is `tokens` and the node passes the subset filter.
    pub fn emit_token(&self, text: impl Into<String>) {
        if self.mode != StreamMode::Tokens {
            return;
        }
        self.emit(StreamEventKind::Token {
            node_id: self.node_id.clone(),
            step: self.step,
            text: text.into(),
        });
    }

    fn emit(&self, kind: StreamEventKind) {
        if let Some(emitter) = &self.emitter {
            let _ = emitter.emit(StreamEvent::now(self.instance_id.clone(), kind));
        }
    }
}

/// Failures surfaced by executor implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// The backing provider (LLM, tool host, service) failed.
    #[error("provider failure in node `{node_id}`: {message}")]
    #[diagnostic(code(harmonyspace::executor::provider))]
    Provider { node_id: String, message: String },

    /// The node expected a state field that is absent or empty.
    #[error("node `{node_id}` is missing required input `{what}`")]
    #[diagnostic(code(harmonyspace::executor::missing_input))]
    MissingInput { node_id: String, what: String },

    /// Payload (de)serialization failed inside the executor.
    #[error("serialization failure in node `{node_id}`")]
    #[diagnostic(code(harmonyspace::executor::serde))]
    Serde {
        node_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Anything else the implementation wants to surface.
    #[error("node `{node_id}` failed: {message}")]
    #[diagnostic(code(harmonyspace::executor::other))]
    Other { node_id: String, message: String },
}

/// Executes agent nodes on behalf of the engine.
///
/// Implementations receive the node's opaque config (exactly as written in
/// the document), a clone of the current state record, and the invocation
/// context. They return the delta to apply; they never mutate state directly.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn invoke(
        &self,
        node: &AgentNode,
        record: StateRecord,
        ctx: ExecutorContext,
    ) -> Result<StateDelta, ExecutorError>;
}
