//! Compiled graph topology.
//!
//! A [`Graph`] is the immutable product of compilation: node specs keyed by
//! id, conditional adjacency in declaration order, parallel fan-out groups,
//! and the entry point. Once built it is shared via `Arc` across every
//! concurrent workflow instance; nothing in it is mutated at runtime, and no
//! state lives here.

pub mod builder;
pub mod edges;
pub mod node;

pub use builder::{CompileError, GraphBuilder};
pub use edges::{Edge, EdgeCondition, ParallelGroup};
pub use node::{AgentNode, HumanIntegrationKind, HumanIntegrationNode, NodeSpec, SubgraphNode};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Identifies a routing target: a named node or the terminal marker.
///
/// The `end` keyword is reserved in documents and encodes/decodes as itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Named(String),
    End,
}

impl NodeId {
    /// Stable string form used in persistence and stream payloads.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::End => "end".into(),
        }
    }

    /// Inverse of [`encode`](Self::encode).
    #[must_use]
    pub fn decode(text: &str) -> Self {
        if text == "end" {
            Self::End
        } else {
            Self::Named(text.to_string())
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::End => None,
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::End => f.write_str("end"),
        }
    }
}

/// The compiled, immutable flow topology.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    entry: String,
    nodes: FxHashMap<String, NodeSpec>,
    edges: FxHashMap<String, Vec<Edge>>,
    parallels: FxHashMap<String, ParallelGroup>,
}

impl Graph {
    pub(crate) fn new(
        name: String,
        entry: String,
        nodes: FxHashMap<String, NodeSpec>,
        edges: FxHashMap<String, Vec<Edge>>,
        parallels: FxHashMap<String, ParallelGroup>,
    ) -> Self {
        Self {
            name,
            entry,
            nodes,
            edges,
            parallels,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the node execution starts at.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Outgoing edges of a node, in declaration order.
    #[must_use]
    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map_or(&[], Vec::as_slice)
    }

    /// Parallel fan-out group anchored at a node, if any.
    #[must_use]
    pub fn parallel_from(&self, id: &str) -> Option<&ParallelGroup> {
        self.parallels.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_through_encode() {
        assert_eq!(NodeId::decode("router"), NodeId::Named("router".into()));
        assert_eq!(NodeId::decode("end"), NodeId::End);
        assert_eq!(NodeId::Named("router".into()).encode(), "router");
        assert_eq!(NodeId::End.encode(), "end");
    }
}
