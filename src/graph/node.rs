//! Node variants of the compiled graph.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{Graph, NodeId};
use crate::condition::Predicate;

/// A compiled node. The set of variants is closed: agents invoked through the
/// executor port, human-integration points that suspend the instance, and
/// embedded subgraphs executed recursively.
#[derive(Debug, Clone)]
pub enum NodeSpec {
    Agent(AgentNode),
    HumanIntegration(HumanIntegrationNode),
    Subgraph(SubgraphNode),
}

impl NodeSpec {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Agent(node) => &node.id,
            Self::HumanIntegration(node) => &node.id,
            Self::Subgraph(node) => &node.id,
        }
    }

    #[must_use]
    pub fn is_human_integration(&self) -> bool {
        matches!(self, Self::HumanIntegration(_))
    }
}

/// An agent step. The config mapping is opaque to the engine and handed to
/// the executor port untouched.
#[derive(Debug, Clone)]
pub struct AgentNode {
    pub id: String,
    pub config: Value,
    pub description: Option<String>,
}

/// The closed set of human-integration interaction patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HumanIntegrationKind {
    /// Unconditional or conditional pause for inspection.
    Breakpoint,
    /// Pause until a human supplies input.
    WaitUserInput,
    /// Pause allowing direct state edits before resuming.
    EditState,
    /// Pause for approval of pending tool calls.
    ReviewToolCalls,
    /// Pause allowing rollback to an earlier checkpoint.
    TimeTravel,
}

impl HumanIntegrationKind {
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "breakpoint" => Some(Self::Breakpoint),
            "wait_user_input" => Some(Self::WaitUserInput),
            "edit_state" => Some(Self::EditState),
            "review_tool_calls" => Some(Self::ReviewToolCalls),
            "time_travel" => Some(Self::TimeTravel),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakpoint => "breakpoint",
            Self::WaitUserInput => "wait_user_input",
            Self::EditState => "edit_state",
            Self::ReviewToolCalls => "review_tool_calls",
            Self::TimeTravel => "time_travel",
        }
    }
}

impl std::fmt::Display for HumanIntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suspension point.
///
/// When the cursor reaches one of these and its trigger holds (a missing
/// trigger always holds), the instance suspends, persists a checkpoint, and
/// waits for a resume carrying one of `actions`. A trigger that does not hold
/// makes the node transparent: routing continues through its outgoing edges
/// without suspending.
#[derive(Debug, Clone)]
pub struct HumanIntegrationNode {
    pub id: String,
    pub kind: HumanIntegrationKind,
    pub trigger: Option<Predicate>,
    /// Resume actions accepted while suspended here.
    pub actions: Vec<String>,
    /// Per-action routing overrides; actions without an entry follow the
    /// node's outgoing edges.
    pub routes: FxHashMap<String, NodeId>,
}

impl HumanIntegrationNode {
    #[must_use]
    pub fn accepts_action(&self, action: &str) -> bool {
        self.actions.iter().any(|allowed| allowed == action)
    }
}

/// An embedded flow, compiled recursively and shared immutably.
#[derive(Debug, Clone)]
pub struct SubgraphNode {
    pub id: String,
    pub graph: Arc<Graph>,
}
