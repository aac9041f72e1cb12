//! Edges and parallel fan-out groups.

use super::NodeId;
use crate::condition::{ConditionError, Predicate};
use crate::state::StateRecord;

/// One outgoing edge. Edges are stored in declaration order; routing evaluates
/// them in that order and the first matching edge wins.
#[derive(Debug, Clone)]
pub struct Edge {
    pub to: NodeId,
    pub condition: EdgeCondition,
}

/// Gate on an edge.
#[derive(Debug, Clone)]
pub enum EdgeCondition {
    /// Unconditional: always taken when reached.
    Always,
    /// Taken when the predicate holds against the current state.
    When(Predicate),
}

impl EdgeCondition {
    /// Evaluate against the current state record.
    pub fn matches(&self, record: &StateRecord) -> Result<bool, ConditionError> {
        match self {
            Self::Always => Ok(true),
            Self::When(predicate) => predicate.eval(record),
        }
    }
}

/// A parallel fan-out anchored at one node.
///
/// After the anchor node completes, every branch runs concurrently against a
/// clone of the current record. With `wait_for_all` the reducer receives all
/// branch deltas in declared branch order; without it the first branch to
/// complete wins, the remaining tasks are aborted, and the reducer receives
/// that single delta. Either way the reducer runs exactly once and the merged
/// delta is applied before routing to `reduce_to`.
#[derive(Debug, Clone)]
pub struct ParallelGroup {
    pub branches: Vec<String>,
    pub wait_for_all: bool,
    pub reducer: String,
    pub reduce_to: NodeId,
}
