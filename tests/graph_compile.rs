//! Graph compilation: topology, conditions, and builder-stage rejections.

mod common;

use harmonyspace::compiler::compile;
use harmonyspace::document::DocumentSet;
use harmonyspace::graph::{CompileError, EdgeCondition, GraphBuilder, NodeId, NodeSpec};
use harmonyspace::reducers::ReducerRegistry;
use serde_json::json;

use common::fixtures::{
    breakpoint_document, parallel_document, router_document, subgraph_parent_document,
};

#[test]
fn compiled_topology_preserves_declaration_order() {
    let flow = common::compile_flow(&router_document());
    let graph = &flow.graph;

    assert_eq!(graph.entry(), "router");
    assert_eq!(graph.node_count(), 3);

    let edges = graph.edges_from("router");
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].to, NodeId::Named("tech_support".into()));
    assert_eq!(edges[1].to, NodeId::Named("billing".into()));
    assert!(matches!(edges[0].condition, EdgeCondition::When(_)));

    assert_eq!(graph.edges_from("tech_support")[0].to, NodeId::End);
}

#[test]
fn human_integration_node_carries_trigger_actions_and_routes() {
    let flow = common::compile_flow(&breakpoint_document());
    let Some(NodeSpec::HumanIntegration(gate)) = flow.graph.node("approval_gate") else {
        panic!("approval_gate should compile to a human-integration node");
    };
    assert!(gate.trigger.is_some());
    assert_eq!(gate.actions, vec!["approve", "reject", "edit_solution"]);
    assert_eq!(gate.routes.get("approve"), Some(&NodeId::End));
    assert_eq!(
        gate.routes.get("reject"),
        Some(&NodeId::Named("rework".into()))
    );
}

#[test]
fn parallel_group_compiles_with_wait_policy() {
    let flow = common::compile_flow(&parallel_document(false));
    let group = flow.graph.parallel_from("dispatch").unwrap();
    assert_eq!(group.branches, vec!["fast", "medium", "slow"]);
    assert!(!group.wait_for_all);
    assert_eq!(group.reducer, "first");
    assert_eq!(group.reduce_to, NodeId::Named("summarize".into()));
}

#[test]
fn malformed_condition_text_is_a_compile_error() {
    let mut document = router_document();
    document["flows"][0]["connections"][0]["to"][0]["condition"] =
        json!("agent_selection == 'tech_support'"); // no state. prefix
    let error = compile(&document, &DocumentSet::default(), &ReducerRegistry::default())
        .unwrap_err();
    assert!(matches!(error, CompileError::InvalidCondition { .. }));
}

#[test]
fn human_node_cannot_be_a_parallel_branch() {
    let mut document = breakpoint_document();
    document["flows"][0]["parallel"] = json!([{
        "from": "solver",
        "branches": ["rework", "approval_gate"],
        "reducer": "merge",
        "reduce_to": "end",
    }]);
    let error = compile(&document, &DocumentSet::default(), &ReducerRegistry::default())
        .unwrap_err();
    assert!(matches!(
        error,
        CompileError::HumanNodeInParallelBranch { ref branch, .. } if branch == "approval_gate"
    ));
}

#[test]
fn subgraph_with_a_missing_source_document_fails_to_build() {
    let document = subgraph_parent_document();
    let registry = ReducerRegistry::default();
    let documents = DocumentSet::default();
    let builder = GraphBuilder::new(&documents, &registry);
    let error = builder.build(&document).unwrap_err();
    assert!(matches!(
        error,
        CompileError::MissingSubgraphSource { ref source_doc, .. }
            if source_doc == "escalation_flow"
    ));
}

#[test]
fn missing_flows_means_no_entry_point() {
    let document = json!({
        "name": "empty",
        "agents": [{"id": "a"}],
        "flows": [],
    });
    let error = compile(&document, &DocumentSet::default(), &ReducerRegistry::default())
        .unwrap_err();
    assert!(matches!(error, CompileError::NoEntryPoint { .. }));
}

#[test]
fn conditionally_exited_cycle_is_allowed() {
    // a -> b -> a is fine as long as b can also leave toward end.
    let document = json!({
        "name": "retry",
        "state": {"schema": {"done": {"type": "boolean"}}},
        "agents": [{"id": "work"}, {"id": "check"}],
        "flows": [{
            "name": "main",
            "entry_point": "work",
            "connections": [
                {"from": "work", "to": "check"},
                {"from": "check", "to": [
                    {"node": "end", "condition": "state.done == true"},
                    {"node": "work", "condition": "state.done == false"},
                ]},
            ],
        }],
    });
    assert!(compile(&document, &DocumentSet::default(), &ReducerRegistry::default()).is_ok());
}

#[test]
fn cycle_with_a_human_exit_is_allowed() {
    // The loop never reaches end on its own, but a human-integration node
    // inside it can break the cycle.
    let document = json!({
        "name": "guarded-loop",
        "state": {"schema": {"count": {"type": "number"}}},
        "agents": [{"id": "work"}],
        "human_integration": [{
            "id": "gate",
            "type": "breakpoint",
            "actions": ["stop", "continue"],
            "routes": {"stop": "end", "continue": "work"},
        }],
        "flows": [{
            "name": "main",
            "entry_point": "work",
            "connections": [
                {"from": "work", "to": "gate"},
                {"from": "gate", "to": "work"},
            ],
        }],
    });
    assert!(compile(&document, &DocumentSet::default(), &ReducerRegistry::default()).is_ok());
}
