//! Built-in reducers.

use super::Reducer;
use crate::state::StateDelta;

/// The `merge` reducer: folds branch deltas together in branch order using the
/// standard field merge rules (lists append, objects shallow-merge, scalars
/// overwrite; later branches win scalar conflicts).
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeBranches;

impl Reducer for MergeBranches {
    fn reduce(&self, branch_results: Vec<StateDelta>) -> StateDelta {
        let mut merged = StateDelta::new();
        for delta in &branch_results {
            merged.merge(delta);
        }
        merged
    }
}

/// The `first` reducer: the first branch result wins outright and the rest
/// are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstResult;

impl Reducer for FirstResult {
    fn reduce(&self, branch_results: Vec<StateDelta>) -> StateDelta {
        branch_results.into_iter().next().unwrap_or_default()
    }
}
