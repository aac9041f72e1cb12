//! Reducers combine the results of parallel branches into one delta.
//!
//! A [`ParallelGroup`](crate::graph::ParallelGroup) names its reducer; the
//! engine resolves the name through the [`ReducerRegistry`] at compile time
//! and invokes the reducer exactly once per fan-out with the branch deltas in
//! declared branch order (or the single winning delta when the group does not
//! wait for all branches).

mod merge;
mod registry;

pub use merge::{FirstResult, MergeBranches};
pub use registry::ReducerRegistry;

use crate::state::StateDelta;

/// Combines ordered branch deltas into the single delta applied to the
/// instance record.
///
/// Implementations must be pure: no side effects, output determined entirely
/// by the input deltas and their order.
pub trait Reducer: Send + Sync {
    fn reduce(&self, branch_results: Vec<StateDelta>) -> StateDelta;
}
