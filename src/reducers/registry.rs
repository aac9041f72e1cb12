//! Name-to-reducer resolution.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{FirstResult, MergeBranches, Reducer};

/// Registry resolving the reducer names that parallel groups declare.
///
/// `Default` registers the built-ins `merge` and `first`; callers may register
/// their own reducers under additional names before compiling.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducers: FxHashMap<String, Arc<dyn Reducer>>,
}

impl ReducerRegistry {
    /// An empty registry with no reducers at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            reducers: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, reducer: Arc<dyn Reducer>) {
        self.reducers.insert(name.into(), reducer);
    }

    #[must_use]
    pub fn with_reducer(mut self, name: impl Into<String>, reducer: Arc<dyn Reducer>) -> Self {
        self.register(name, reducer);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Reducer>> {
        self.reducers.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.reducers.contains_key(name)
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        Self::empty()
            .with_reducer("merge", Arc::new(MergeBranches))
            .with_reducer("first", Arc::new(FirstResult))
    }
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("names", &self.reducers.keys().collect::<Vec<_>>())
            .finish()
    }
}
