//! End-to-end stepping and routing through the engine.

mod common;

use std::sync::Arc;

use harmonyspace::graph::NodeId;
use harmonyspace::runtime::{FaultKind, InstanceInit, InstanceStatus, RuntimeError, StepReport};
use harmonyspace::state::StateDelta;
use serde_json::json;

use common::executors::ScriptedExecutor;
use common::fixtures::{
    escalation_subdocument, router_document, subgraph_parent_document,
};
use harmonyspace::document::DocumentSet;
use harmonyspace::reducers::ReducerRegistry;
use harmonyspace::runtime::{Engine, InMemoryCheckpointStore, RuntimeConfig};

#[tokio::test]
async fn routes_on_agent_selection_and_terminates() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delta(
                "router",
                StateDelta::new()
                    .with_field("agent_selection", json!({"agent_id": "tech_support"}))
                    .with_field("messages", json!(["routing to tech support"])),
            )
            .with_delta(
                "tech_support",
                StateDelta::new().with_field("messages", json!(["rebooted the router"])),
            ),
    );
    let mut engine = common::engine_for(&router_document(), executor.clone());

    assert_eq!(
        engine.create_instance("wf-1").await.unwrap(),
        InstanceInit::Fresh
    );
    let report = engine.run_until_settled("wf-1").await.unwrap();
    assert_eq!(report, StepReport::Terminated);

    assert_eq!(executor.invocations(), vec!["router", "tech_support"]);
    let instance = engine.instance("wf-1").unwrap();
    assert_eq!(instance.status, InstanceStatus::Terminated);
    assert_eq!(
        instance.record.get_path("messages"),
        Some(&json!(["routing to tech support", "rebooted the router"]))
    );
    assert_eq!(instance.step, 2);
}

#[tokio::test]
async fn step_reports_expose_each_move() {
    let executor = Arc::new(ScriptedExecutor::new().with_delta(
        "router",
        StateDelta::new().with_field("agent_selection", json!({"agent_id": "billing"})),
    ));
    let mut engine = common::engine_for(&router_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    let first = engine.step("wf-1").await.unwrap();
    assert_eq!(
        first,
        StepReport::Advanced {
            node: "router".into(),
            next: NodeId::Named("billing".into()),
        }
    );

    let second = engine.step("wf-1").await.unwrap();
    assert_eq!(
        second,
        StepReport::Advanced {
            node: "billing".into(),
            next: NodeId::End,
        }
    );

    assert_eq!(engine.step("wf-1").await.unwrap(), StepReport::Terminated);
    assert_eq!(engine.step("wf-1").await.unwrap(), StepReport::Idle);
}

#[tokio::test]
async fn no_matching_edge_faults_the_instance() {
    // Router writes an agent id no edge condition matches.
    let executor = Arc::new(ScriptedExecutor::new().with_delta(
        "router",
        StateDelta::new().with_field("agent_selection", json!({"agent_id": "legal"})),
    ));
    let mut engine = common::engine_for(&router_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    let report = engine.run_until_settled("wf-1").await.unwrap();
    assert!(matches!(
        report,
        StepReport::Faulted { ref node, ref fault }
            if node == "router" && fault.kind == FaultKind::Routing
    ));
    assert!(matches!(
        engine.instance("wf-1").unwrap().status,
        InstanceStatus::Faulted { .. }
    ));
}

#[tokio::test]
async fn executor_failure_faults_without_losing_state() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delta(
                "router",
                StateDelta::new()
                    .with_field("agent_selection", json!({"agent_id": "billing"}))
                    .with_field("messages", json!(["step one"])),
            )
            .with_failure("billing"),
    );
    let mut engine = common::engine_for(&router_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    let report = engine.run_until_settled("wf-1").await.unwrap();
    assert!(matches!(
        report,
        StepReport::Faulted { ref node, ref fault }
            if node == "billing" && fault.kind == FaultKind::Executor
    ));

    // The delta applied before the failing node survives on the instance.
    let instance = engine.instance("wf-1").unwrap();
    assert_eq!(instance.record.get_path("messages"), Some(&json!(["step one"])));
}

#[tokio::test]
async fn unknown_instance_is_an_engine_error() {
    let executor = Arc::new(ScriptedExecutor::new());
    let mut engine = common::engine_for(&router_document(), executor);
    assert!(matches!(
        engine.step("nobody").await,
        Err(RuntimeError::UnknownInstance { .. })
    ));
}

#[tokio::test]
async fn duplicate_instance_ids_are_rejected() {
    let executor = Arc::new(ScriptedExecutor::new());
    let mut engine = common::engine_for(&router_document(), executor);
    engine.create_instance("wf-1").await.unwrap();
    assert!(matches!(
        engine.create_instance("wf-1").await,
        Err(RuntimeError::InstanceAlreadyExists { .. })
    ));
}

#[tokio::test]
async fn subgraph_runs_to_completion_within_one_parent_step() {
    let documents =
        DocumentSet::new().with_document("escalation_flow", escalation_subdocument());
    let flow = common::compile_flow_with(&subgraph_parent_document(), &documents);

    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delta("intake", StateDelta::new().with_field("log", json!(["intake"])))
            .with_delta(
                "assess",
                StateDelta::new()
                    .with_field("log", json!(["assess"]))
                    .with_field("escalated", json!(true)),
            )
            .with_delta("notify", StateDelta::new().with_field("log", json!(["notify"]))),
    );
    let mut engine = Engine::new(
        flow,
        executor.clone(),
        Arc::new(ReducerRegistry::default()),
        Arc::new(InMemoryCheckpointStore::new()),
        RuntimeConfig::default(),
    );
    engine.create_instance("wf-1").await.unwrap();

    assert_eq!(
        engine.run_until_settled("wf-1").await.unwrap(),
        StepReport::Terminated
    );
    assert_eq!(executor.invocations(), vec!["intake", "assess", "notify"]);

    let instance = engine.instance("wf-1").unwrap();
    assert_eq!(
        instance.record.get_path("log"),
        Some(&json!(["intake", "assess", "notify"]))
    );
    assert_eq!(instance.record.get_path("escalated"), Some(&json!(true)));
    // intake, the subgraph node, then the terminal step.
    assert_eq!(instance.step, 2);
}

#[tokio::test]
async fn cancellation_settles_the_instance() {
    let executor = Arc::new(ScriptedExecutor::new().with_delta(
        "router",
        StateDelta::new().with_field("agent_selection", json!({"agent_id": "billing"})),
    ));
    let mut engine = common::engine_for(&router_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    engine.step("wf-1").await.unwrap();
    engine.cancel("wf-1").unwrap();

    assert_eq!(engine.step("wf-1").await.unwrap(), StepReport::Cancelled);
    assert_eq!(
        engine.instance("wf-1").unwrap().status,
        InstanceStatus::Cancelled
    );
}
