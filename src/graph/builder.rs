//! Graph compilation from a validated document.
//!
//! The builder assumes the validator has already passed the document set; its
//! own errors cover what structural validation cannot see: condition parsing,
//! reducer registration, topology defects (no entry point, unproductive
//! cycles, human-integration nodes used as parallel branches), and the
//! recursive compilation of subgraph documents.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::{
    AgentNode, Edge, EdgeCondition, Graph, HumanIntegrationKind, HumanIntegrationNode, NodeId,
    NodeSpec, ParallelGroup, SubgraphNode,
};
use crate::condition::{PredicateParseError, parse_predicate};
use crate::document::{DocumentSet, get_map, get_seq, get_str};
use crate::reducers::ReducerRegistry;
use crate::schema::SchemaError;
use crate::validation::ValidationError;

/// Failures of the compilation pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// The document set failed structural validation.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    /// The state schema failed to compile.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    /// The document declares no flow, or its first flow has no entry point.
    #[error("document `{document}` has no usable entry point")]
    #[diagnostic(
        code(harmonyspace::compile::no_entry_point),
        help("Declare at least one flow with an `entry_point` naming a node.")
    )]
    NoEntryPoint { document: String },

    /// A parallel group names a reducer the registry does not know.
    #[error("parallel group at `{group}` names unknown reducer `{reducer}`")]
    #[diagnostic(
        code(harmonyspace::compile::unknown_reducer),
        help("Register the reducer before compiling, or use a built-in (`merge`, `first`).")
    )]
    UnknownReducer { group: String, reducer: String },

    /// A lookup failed that validation should have guaranteed.
    #[error("unknown reference `{reference}` at {site}")]
    #[diagnostic(code(harmonyspace::compile::unknown_reference))]
    UnknownReference { site: String, reference: String },

    /// A condition expression failed to parse.
    #[error("invalid condition at {site}")]
    #[diagnostic(code(harmonyspace::compile::invalid_condition))]
    InvalidCondition {
        site: String,
        #[source]
        #[diagnostic_source]
        source: PredicateParseError,
    },

    /// A human-integration node was used as a parallel branch. Suspension is
    /// a single-cursor concept and cannot happen inside a fan-out.
    #[error("human-integration node `{branch}` cannot be a branch of parallel group `{group}`")]
    #[diagnostic(
        code(harmonyspace::compile::human_node_in_parallel_branch),
        help("Place the human-integration node before the fan-out or after the reduce target.")
    )]
    HumanNodeInParallelBranch { group: String, branch: String },

    /// A cycle with no human-integration node and no path to the terminal
    /// marker: execution entering it could never settle.
    #[error("cycle without progress through nodes: {}", nodes.join(" -> "))]
    #[diagnostic(
        code(harmonyspace::compile::cycle_without_progress),
        help("Give the cycle a conditional exit toward `end` or a human-integration node.")
    )]
    CycleWithoutProgress { nodes: Vec<String> },

    /// A subgraph names a source the document set does not hold.
    #[error("subgraph `{id}` references missing source document `{source_doc}`")]
    #[diagnostic(code(harmonyspace::compile::missing_subgraph_source))]
    MissingSubgraphSource { id: String, source_doc: String },

    /// A shape the validator guarantees was not found; indicates the builder
    /// ran on an unvalidated tree.
    #[error("malformed document at {site}")]
    #[diagnostic(code(harmonyspace::compile::malformed_document))]
    MalformedDocument { site: String },
}

/// Compiles validated documents into immutable [`Graph`]s.
pub struct GraphBuilder<'a> {
    documents: &'a DocumentSet,
    reducers: &'a ReducerRegistry,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(documents: &'a DocumentSet, reducers: &'a ReducerRegistry) -> Self {
        Self {
            documents,
            reducers,
        }
    }

    /// Compile the top-level document. Subgraphs compile recursively; each
    /// [`SubgraphNode`] holds its compiled graph behind an `Arc`.
    pub fn build(&self, document: &Value) -> Result<Graph, CompileError> {
        let mut sources_in_progress = Vec::new();
        self.build_document(document, &mut sources_in_progress)
    }

    fn build_document(
        &self,
        document: &Value,
        sources_in_progress: &mut Vec<String>,
    ) -> Result<Graph, CompileError> {
        let name = get_str(document, "name").unwrap_or("unnamed").to_string();

        let mut nodes: FxHashMap<String, NodeSpec> = FxHashMap::default();
        self.build_agents(document, &mut nodes)?;
        self.build_human_integration(document, &mut nodes)?;
        self.build_subgraphs(document, &mut nodes, sources_in_progress)?;

        let Some(flow) = get_seq(document, "flows").and_then(|flows| flows.first()) else {
            return Err(CompileError::NoEntryPoint { document: name });
        };
        let Some(entry) = get_str(flow, "entry_point") else {
            return Err(CompileError::NoEntryPoint { document: name });
        };
        if !nodes.contains_key(entry) {
            return Err(CompileError::UnknownReference {
                site: format!("flow entry point of `{name}`"),
                reference: entry.to_string(),
            });
        }

        let edges = build_edges(flow, &name)?;
        let parallels = self.build_parallels(flow, &name, &nodes)?;

        let graph = Graph::new(name, entry.to_string(), nodes, edges, parallels);
        analyze_topology(&graph)?;
        Ok(graph)
    }

    fn build_agents(
        &self,
        document: &Value,
        nodes: &mut FxHashMap<String, NodeSpec>,
    ) -> Result<(), CompileError> {
        let Some(agents) = get_seq(document, "agents") else {
            return Ok(());
        };
        for (index, entry) in agents.iter().enumerate() {
            let id = require_str(entry, "id", &format!("agents[{index}]"))?;
            nodes.insert(
                id.to_string(),
                NodeSpec::Agent(AgentNode {
                    id: id.to_string(),
                    config: entry.clone(),
                    description: get_str(entry, "description").map(ToString::to_string),
                }),
            );
        }
        Ok(())
    }

    fn build_human_integration(
        &self,
        document: &Value,
        nodes: &mut FxHashMap<String, NodeSpec>,
    ) -> Result<(), CompileError> {
        let Some(entries) = get_seq(document, "human_integration") else {
            return Ok(());
        };
        for (index, entry) in entries.iter().enumerate() {
            let site = format!("human_integration[{index}]");
            let id = require_str(entry, "id", &site)?;
            let kind_keyword = require_str(entry, "type", &site)?;
            let Some(kind) = HumanIntegrationKind::parse(kind_keyword) else {
                return Err(CompileError::MalformedDocument { site });
            };

            let trigger = match get_str(entry, "trigger") {
                Some(expression) => {
                    Some(parse_predicate(expression).map_err(|source| {
                        CompileError::InvalidCondition {
                            site: format!("{site}.trigger"),
                            source,
                        }
                    })?)
                }
                None => None,
            };

            let actions = get_seq(entry, "actions")
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let mut routes = FxHashMap::default();
            if let Some(route_map) = get_map(entry, "routes") {
                for (action, target) in route_map {
                    let Some(target) = target.as_str() else {
                        return Err(CompileError::MalformedDocument {
                            site: format!("{site}.routes.{action}"),
                        });
                    };
                    routes.insert(action.clone(), NodeId::decode(target));
                }
            }

            nodes.insert(
                id.to_string(),
                NodeSpec::HumanIntegration(HumanIntegrationNode {
                    id: id.to_string(),
                    kind,
                    trigger,
                    actions,
                    routes,
                }),
            );
        }
        Ok(())
    }

    fn build_subgraphs(
        &self,
        document: &Value,
        nodes: &mut FxHashMap<String, NodeSpec>,
        sources_in_progress: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        let Some(entries) = get_seq(document, "subgraphs") else {
            return Ok(());
        };
        for (index, entry) in entries.iter().enumerate() {
            let site = format!("subgraphs[{index}]");
            let id = require_str(entry, "id", &site)?;
            let source = require_str(entry, "source", &site)?;

            let Some(subdocument) = self.documents.get(source) else {
                return Err(CompileError::MissingSubgraphSource {
                    id: id.to_string(),
                    source_doc: source.to_string(),
                });
            };
            if sources_in_progress.iter().any(|seen| seen == source) {
                return Err(CompileError::MalformedDocument {
                    site: format!("{site}.source (cyclic subgraph reference `{source}`)"),
                });
            }

            sources_in_progress.push(source.to_string());
            let graph = self.build_document(subdocument, sources_in_progress)?;
            sources_in_progress.pop();

            nodes.insert(
                id.to_string(),
                NodeSpec::Subgraph(SubgraphNode {
                    id: id.to_string(),
                    graph: Arc::new(graph),
                }),
            );
        }
        Ok(())
    }

    fn build_parallels(
        &self,
        flow: &Value,
        flow_name: &str,
        nodes: &FxHashMap<String, NodeSpec>,
    ) -> Result<FxHashMap<String, ParallelGroup>, CompileError> {
        let mut parallels = FxHashMap::default();
        let Some(groups) = get_seq(flow, "parallel") else {
            return Ok(parallels);
        };
        for (index, group) in groups.iter().enumerate() {
            let site = format!("flow `{flow_name}` parallel[{index}]");
            let from = require_str(group, "from", &site)?;
            let reducer = require_str(group, "reducer", &site)?;
            let reduce_to = require_str(group, "reduce_to", &site)?;

            if !self.reducers.contains(reducer) {
                return Err(CompileError::UnknownReducer {
                    group: from.to_string(),
                    reducer: reducer.to_string(),
                });
            }

            let Some(branch_values) = get_seq(group, "branches") else {
                return Err(CompileError::MalformedDocument {
                    site: format!("{site}.branches"),
                });
            };
            let mut branches = Vec::with_capacity(branch_values.len());
            for value in branch_values {
                let Some(branch) = value.as_str() else {
                    return Err(CompileError::MalformedDocument {
                        site: format!("{site}.branches"),
                    });
                };
                match nodes.get(branch) {
                    Some(spec) if spec.is_human_integration() => {
                        return Err(CompileError::HumanNodeInParallelBranch {
                            group: from.to_string(),
                            branch: branch.to_string(),
                        });
                    }
                    Some(_) => branches.push(branch.to_string()),
                    None => {
                        return Err(CompileError::UnknownReference {
                            site: format!("{site}.branches"),
                            reference: branch.to_string(),
                        });
                    }
                }
            }

            let wait_for_all = group
                .get("wait_for_all")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            parallels.insert(
                from.to_string(),
                ParallelGroup {
                    branches,
                    wait_for_all,
                    reducer: reducer.to_string(),
                    reduce_to: NodeId::decode(reduce_to),
                },
            );
        }
        Ok(parallels)
    }
}

fn build_edges(
    flow: &Value,
    flow_name: &str,
) -> Result<FxHashMap<String, Vec<Edge>>, CompileError> {
    let mut edges: FxHashMap<String, Vec<Edge>> = FxHashMap::default();
    let Some(connections) = get_seq(flow, "connections") else {
        return Ok(edges);
    };
    for (index, connection) in connections.iter().enumerate() {
        let site = format!("flow `{flow_name}` connections[{index}]");
        let from = require_str(connection, "from", &site)?;
        let outgoing = edges.entry(from.to_string()).or_default();

        match connection.get("to") {
            Some(Value::String(to)) => outgoing.push(Edge {
                to: NodeId::decode(to),
                condition: EdgeCondition::Always,
            }),
            Some(Value::Array(targets)) => {
                for (ti, target) in targets.iter().enumerate() {
                    let target_site = format!("{site}.to[{ti}]");
                    let node = require_str(target, "node", &target_site)?;
                    let expression = require_str(target, "condition", &target_site)?;
                    let predicate = parse_predicate(expression).map_err(|source| {
                        CompileError::InvalidCondition {
                            site: target_site,
                            source,
                        }
                    })?;
                    outgoing.push(Edge {
                        to: NodeId::decode(node),
                        condition: EdgeCondition::When(predicate),
                    });
                }
            }
            _ => return Err(CompileError::MalformedDocument { site }),
        }
    }
    Ok(edges)
}

fn require_str<'v>(value: &'v Value, key: &str, site: &str) -> Result<&'v str, CompileError> {
    get_str(value, key).ok_or_else(|| CompileError::MalformedDocument {
        site: format!("{site}.{key}"),
    })
}

/// Post-build topology checks: warn when the terminal marker is statically
/// unreachable from the entry, and reject cycles that contain no
/// human-integration node and cannot reach the terminal marker.
fn analyze_topology(graph: &Graph) -> Result<(), CompileError> {
    let successors = successor_map(graph);

    if !end_reachable_from_entry(graph, &successors) {
        warn!(
            graph = graph.name(),
            entry = graph.entry(),
            "terminal marker is statically unreachable from the entry point"
        );
    }

    let reaches_end = nodes_reaching_end(graph, &successors);
    detect_unproductive_cycle(graph, &successors, &reaches_end)
}

/// Successor node ids per node, folding in conditional edges, resume routes,
/// and parallel fan-out (branches plus the reduce target).
fn successor_map(graph: &Graph) -> FxHashMap<String, Vec<NodeId>> {
    let mut successors: FxHashMap<String, Vec<NodeId>> = FxHashMap::default();
    for id in graph.node_ids() {
        let mut targets: Vec<NodeId> = graph
            .edges_from(id)
            .iter()
            .map(|edge| edge.to.clone())
            .collect();
        if let Some(NodeSpec::HumanIntegration(node)) = graph.node(id) {
            targets.extend(node.routes.values().cloned());
        }
        if let Some(group) = graph.parallel_from(id) {
            targets.extend(group.branches.iter().cloned().map(NodeId::Named));
            targets.push(group.reduce_to.clone());
        }
        successors.insert(id.clone(), targets);
    }
    successors
}

fn end_reachable_from_entry(
    graph: &Graph,
    successors: &FxHashMap<String, Vec<NodeId>>,
) -> bool {
    let mut queue = VecDeque::from([graph.entry().to_string()]);
    let mut visited: Vec<String> = Vec::new();
    while let Some(current) = queue.pop_front() {
        if visited.iter().any(|seen| *seen == current) {
            continue;
        }
        visited.push(current.clone());
        for target in successors.get(&current).map_or(&[][..], Vec::as_slice) {
            match target {
                NodeId::End => return true,
                NodeId::Named(next) => queue.push_back(next.clone()),
            }
        }
    }
    false
}

/// Fixpoint over the successor map: the set of nodes from which the terminal
/// marker is reachable.
fn nodes_reaching_end(
    graph: &Graph,
    successors: &FxHashMap<String, Vec<NodeId>>,
) -> Vec<String> {
    let mut reaches: Vec<String> = Vec::new();
    loop {
        let mut changed = false;
        for id in graph.node_ids() {
            if reaches.iter().any(|seen| seen == id) {
                continue;
            }
            let hits = successors
                .get(id)
                .is_some_and(|targets| {
                    targets.iter().any(|target| match target {
                        NodeId::End => true,
                        NodeId::Named(next) => reaches.iter().any(|seen| seen == next),
                    })
                });
            if hits {
                reaches.push(id.clone());
                changed = true;
            }
        }
        if !changed {
            return reaches;
        }
    }
}

/// Search for a cycle within the subgraph of nodes that are not
/// human-integration points and cannot reach the terminal marker. Any cycle
/// there can never settle.
fn detect_unproductive_cycle(
    graph: &Graph,
    successors: &FxHashMap<String, Vec<NodeId>>,
    reaches_end: &[String],
) -> Result<(), CompileError> {
    let stuck: Vec<&String> = graph
        .node_ids()
        .filter(|id| {
            !reaches_end.iter().any(|seen| &seen == id)
                && graph.node(id).is_some_and(|spec| !spec.is_human_integration())
        })
        .collect();

    let mut done: Vec<String> = Vec::new();
    for start in &stuck {
        if done.iter().any(|seen| &seen == start) {
            continue;
        }
        let mut path: Vec<String> = Vec::new();
        let mut stack: Vec<(String, usize)> = vec![((*start).clone(), 0)];
        while let Some((node, next_index)) = stack.pop() {
            if next_index == 0 {
                if let Some(position) = path.iter().position(|seen| *seen == node) {
                    let mut cycle: Vec<String> = path[position..].to_vec();
                    cycle.push(node);
                    return Err(CompileError::CycleWithoutProgress { nodes: cycle });
                }
                path.push(node.clone());
            }
            let targets = successors.get(&node).map_or(&[][..], Vec::as_slice);
            let mut advanced = false;
            for (offset, target) in targets.iter().enumerate().skip(next_index) {
                if let NodeId::Named(next) = target
                    && stuck.iter().any(|id| *id == next)
                    && !done.iter().any(|seen| seen == next)
                {
                    stack.push((node.clone(), offset + 1));
                    stack.push((next.clone(), 0));
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                path.pop();
                done.push(node);
            }
        }
    }
    Ok(())
}
