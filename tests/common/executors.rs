//! Test node executors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harmonyspace::executor::{ExecutorContext, ExecutorError, NodeExecutor};
use harmonyspace::graph::AgentNode;
use harmonyspace::state::{StateDelta, StateRecord};

/// Executor returning a pre-scripted delta per node id, with optional
/// per-node delays and failures. Records invocation order.
#[derive(Default)]
pub struct ScriptedExecutor {
    deltas: HashMap<String, StateDelta>,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    invocations: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delta(mut self, node_id: &str, delta: StateDelta) -> Self {
        self.deltas.insert(node_id.to_string(), delta);
        self
    }

    pub fn with_delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.delays.insert(node_id.to_string(), delay);
        self
    }

    pub fn with_failure(mut self, node_id: &str) -> Self {
        self.failures.insert(node_id.to_string());
        self
    }

    /// Node ids in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeExecutor for ScriptedExecutor {
    async fn invoke(
        &self,
        node: &AgentNode,
        _record: StateRecord,
        _ctx: ExecutorContext,
    ) -> Result<StateDelta, ExecutorError> {
        self.invocations.lock().unwrap().push(node.id.clone());
        if let Some(delay) = self.delays.get(&node.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(&node.id) {
            return Err(ExecutorError::Provider {
                node_id: node.id.clone(),
                message: "scripted failure".into(),
            });
        }
        Ok(self.deltas.get(&node.id).cloned().unwrap_or_default())
    }
}

/// Executor that streams a message and a token for every node it runs,
/// then returns an empty delta.
#[derive(Default)]
pub struct StreamingExecutor;

#[async_trait]
impl NodeExecutor for StreamingExecutor {
    async fn invoke(
        &self,
        node: &AgentNode,
        _record: StateRecord,
        ctx: ExecutorContext,
    ) -> Result<StateDelta, ExecutorError> {
        ctx.emit_message(format!("hello from {}", node.id));
        ctx.emit_token("tok");
        Ok(StateDelta::new())
    }
}
