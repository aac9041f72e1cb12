//! Stream event types and the emitter handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bus::EventBusError;

/// What the stream carries, as declared in `config.streaming.mode`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Raw token chunks emitted by node executors.
    Tokens,
    /// Whole messages emitted by node executors.
    Messages,
    /// Node lifecycle events (started / completed, with the produced delta).
    Events,
    /// Full state record snapshot after each applied delta.
    #[default]
    Values,
}

impl StreamMode {
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "tokens" => Some(Self::Tokens),
            "messages" => Some(Self::Messages),
            "events" => Some(Self::Events),
            "values" => Some(Self::Values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tokens => "tokens",
            Self::Messages => "messages",
            Self::Events => "events",
            Self::Values => "values",
        }
    }
}

/// One observable occurrence during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub at: DateTime<Utc>,
    pub instance_id: String,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

/// The payload of a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEventKind {
    NodeStarted {
        node_id: String,
        step: u64,
    },
    NodeCompleted {
        node_id: String,
        step: u64,
        delta: Value,
    },
    /// Full record snapshot, emitted in `values` mode after each step.
    Values {
        node_id: String,
        step: u64,
        record: Value,
    },
    /// Executor-emitted message, forwarded in `messages` mode.
    Message {
        node_id: String,
        step: u64,
        text: String,
    },
    /// Executor-emitted token chunk, forwarded in `tokens` mode.
    Token {
        node_id: String,
        step: u64,
        text: String,
    },
    Suspended {
        node_id: String,
        allowed_actions: Vec<String>,
    },
    Resumed {
        node_id: String,
        action: String,
    },
    Terminated,
    Cancelled,
    Faulted {
        node_id: String,
        kind: String,
        error: String,
    },
    /// Out-of-band engine diagnostics, always forwarded.
    Diagnostic {
        scope: String,
        message: String,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn now(instance_id: impl Into<String>, kind: StreamEventKind) -> Self {
        Self {
            at: Utc::now(),
            instance_id: instance_id.into(),
            kind,
        }
    }

    /// The node this event is bound to, when it is node-bound at all.
    /// Lifecycle and diagnostic events return `None` and bypass node-subset
    /// filtering.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match &self.kind {
            StreamEventKind::NodeStarted { node_id, .. }
            | StreamEventKind::NodeCompleted { node_id, .. }
            | StreamEventKind::Values { node_id, .. }
            | StreamEventKind::Message { node_id, .. }
            | StreamEventKind::Token { node_id, .. }
            | StreamEventKind::Suspended { node_id, .. }
            | StreamEventKind::Resumed { node_id, .. }
            | StreamEventKind::Faulted { node_id, .. } => Some(node_id),
            StreamEventKind::Terminated
            | StreamEventKind::Cancelled
            | StreamEventKind::Diagnostic { .. } => None,
        }
    }

    /// JSON projection for observers and sinks.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Cloneable handle for pushing events into the bus channel.
///
/// Handed to node executors through the
/// [`ExecutorContext`](crate::executor::ExecutorContext) so they can stream
/// tokens and messages mid-invocation.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    sender: flume::Sender<StreamEvent>,
}

impl EventEmitter {
    #[must_use]
    pub fn new(sender: flume::Sender<StreamEvent>) -> Self {
        Self { sender }
    }

    pub fn emit(&self, event: StreamEvent) -> Result<(), EventBusError> {
        self.sender
            .send(event)
            .map_err(|_| EventBusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_projection_tags_the_event_kind() {
        let event = StreamEvent::now(
            "wf-1",
            StreamEventKind::NodeCompleted {
                node_id: "router".into(),
                step: 3,
                delta: serde_json::json!({"x": 1}),
            },
        );
        let json = event.to_json_value();
        assert_eq!(json["event"], "node_completed");
        assert_eq!(json["instance_id"], "wf-1");
        assert_eq!(json["node_id"], "router");
    }

    #[test]
    fn node_binding_is_reported() {
        let bound = StreamEvent::now(
            "wf-1",
            StreamEventKind::NodeStarted {
                node_id: "router".into(),
                step: 0,
            },
        );
        assert_eq!(bound.node_id(), Some("router"));
        let unbound = StreamEvent::now("wf-1", StreamEventKind::Terminated);
        assert_eq!(unbound.node_id(), None);
    }
}
