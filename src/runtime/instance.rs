//! Per-instance execution state.

use std::fmt;

use crate::graph::NodeId;
use crate::state::StateRecord;

/// Why an instance faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// No outgoing edge matched, or a referenced node is missing.
    Routing,
    /// A condition evaluated against incompatible types.
    Condition,
    /// The executor port failed, or a branch task panicked.
    Executor,
    /// A trigger held where no suspension point exists (inside a subgraph
    /// or a parallel branch).
    Suspension,
    /// An inconsistency compilation should have ruled out.
    Internal,
}

impl FaultKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Condition => "condition",
            Self::Executor => "executor",
            Self::Suspension => "suspension",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault cause: the kind plus a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn routing(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Routing, message)
    }

    pub(crate) fn condition(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Condition, message)
    }

    pub(crate) fn executor(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Executor, message)
    }

    pub(crate) fn suspension(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Suspension, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Internal, message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Where one workflow instance stands in its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceStatus {
    /// The cursor rests on a node (or the terminal marker) awaiting the next
    /// step.
    Ready(NodeId),
    /// A node invocation is in flight.
    Running(NodeId),
    /// Suspended at a human-integration node; only a resume with one of the
    /// allowed actions advances the instance.
    Suspended {
        node: String,
        allowed_actions: Vec<String>,
    },
    /// A node failed or routing dead-ended; the last persisted checkpoint
    /// remains valid.
    Faulted { node: String, fault: Fault },
    /// Reached the terminal marker.
    Terminated,
    /// Cancelled by the host.
    Cancelled,
}

impl InstanceStatus {
    /// Whether the instance has settled: no step will ever change it again
    /// (suspension is not settled, a resume can still move it).
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Faulted { .. } | Self::Terminated | Self::Cancelled
        )
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// One running (or settled) execution of a compiled flow.
#[derive(Clone, Debug)]
pub struct WorkflowInstance {
    pub id: String,
    pub record: StateRecord,
    pub status: InstanceStatus,
    /// Completed node executions.
    pub step: u64,
    /// Sequence number of the last persisted checkpoint.
    pub checkpoint_seq: u64,
}

impl WorkflowInstance {
    #[must_use]
    pub fn fresh(id: impl Into<String>, record: StateRecord, entry: &str) -> Self {
        Self {
            id: id.into(),
            record,
            status: InstanceStatus::Ready(NodeId::Named(entry.to_string())),
            step: 0,
            checkpoint_seq: 0,
        }
    }
}

/// How `create_instance` obtained the instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceInit {
    /// Started from schema defaults at the entry point.
    Fresh,
    /// Restored from a persisted checkpoint.
    Resumed,
}
