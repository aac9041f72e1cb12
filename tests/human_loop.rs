//! Suspension, resume actions, state edits, and transparent pass-through.

mod common;

use std::sync::Arc;

use harmonyspace::graph::NodeId;
use harmonyspace::runtime::{InstanceStatus, RuntimeError, StepReport};
use harmonyspace::state::StateDelta;
use serde_json::json;

use common::executors::ScriptedExecutor;
use common::fixtures::breakpoint_document;

fn low_confidence_executor() -> ScriptedExecutor {
    ScriptedExecutor::new()
        .with_delta(
            "solver",
            StateDelta::new()
                .with_field("solution", json!("turn it off and on"))
                .with_field("solution_confidence", json!(0.4)),
        )
        .with_delta(
            "rework",
            StateDelta::new().with_field("solution", json!("replace the unit")),
        )
}

#[tokio::test]
async fn low_confidence_trips_the_breakpoint() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    let report = engine.run_until_settled("wf-1").await.unwrap();
    assert_eq!(
        report,
        StepReport::Suspended {
            node: "approval_gate".into(),
            allowed_actions: vec![
                "approve".into(),
                "reject".into(),
                "edit_solution".into()
            ],
        }
    );
    assert!(engine.instance("wf-1").unwrap().status.is_suspended());

    // Stepping a suspended instance changes nothing.
    assert_eq!(engine.step("wf-1").await.unwrap(), StepReport::Idle);
}

#[tokio::test]
async fn high_confidence_passes_through_transparently() {
    let executor = Arc::new(ScriptedExecutor::new().with_delta(
        "solver",
        StateDelta::new()
            .with_field("solution", json!("swap the cable"))
            .with_field("solution_confidence", json!(0.95)),
    ));
    let mut engine = common::engine_for(&breakpoint_document(), executor.clone());
    engine.create_instance("wf-1").await.unwrap();

    engine.step("wf-1").await.unwrap(); // solver
    let report = engine.step("wf-1").await.unwrap();
    assert_eq!(
        report,
        StepReport::PassedThrough {
            node: "approval_gate".into(),
            next: NodeId::End,
        }
    );

    assert_eq!(
        engine.run_until_settled("wf-1").await.unwrap(),
        StepReport::Terminated
    );
    // Only the solver ever executed.
    assert_eq!(executor.invocations(), vec!["solver"]);
}

#[tokio::test]
async fn approve_routes_to_the_terminal_marker() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();
    engine.run_until_settled("wf-1").await.unwrap();

    let report = engine.resume("wf-1", "approve", None).await.unwrap();
    assert_eq!(
        report,
        StepReport::Advanced {
            node: "approval_gate".into(),
            next: NodeId::End,
        }
    );
    assert_eq!(
        engine.run_until_settled("wf-1").await.unwrap(),
        StepReport::Terminated
    );
}

#[tokio::test]
async fn reject_routes_to_rework() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor.clone());
    engine.create_instance("wf-1").await.unwrap();
    engine.run_until_settled("wf-1").await.unwrap();

    engine.resume("wf-1", "reject", None).await.unwrap();
    assert_eq!(
        engine.run_until_settled("wf-1").await.unwrap(),
        StepReport::Terminated
    );
    assert_eq!(executor.invocations(), vec!["solver", "rework"]);
    assert_eq!(
        engine.instance("wf-1").unwrap().record.get_path("solution"),
        Some(&json!("replace the unit"))
    );
}

#[tokio::test]
async fn invalid_action_is_rejected_and_the_instance_stays_suspended() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();
    engine.run_until_settled("wf-1").await.unwrap();

    let error = engine.resume("wf-1", "escalate", None).await.unwrap_err();
    assert!(matches!(
        error,
        RuntimeError::InvalidResumeAction { ref action, .. } if action == "escalate"
    ));
    assert!(engine.instance("wf-1").unwrap().status.is_suspended());

    // A valid action still works afterwards.
    engine.resume("wf-1", "approve", None).await.unwrap();
}

#[tokio::test]
async fn resume_with_edit_applies_the_delta_before_routing() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();
    engine.run_until_settled("wf-1").await.unwrap();

    let edit = StateDelta::new()
        .with_field("solution", json!("escalate to tier two"))
        .with_field("approvals", json!(["edited by operator"]));
    engine.resume("wf-1", "edit_solution", Some(edit)).await.unwrap();

    let instance = engine.instance("wf-1").unwrap();
    assert_eq!(
        instance.record.get_path("solution"),
        Some(&json!("escalate to tier two"))
    );
    assert_eq!(
        instance.record.get_path("approvals"),
        Some(&json!(["edited by operator"]))
    );
    // The edit_solution route sends the cursor back to the solver.
    assert_eq!(
        instance.status,
        InstanceStatus::Ready(NodeId::Named("solver".into()))
    );
}

#[tokio::test]
async fn edit_delta_applies_whatever_the_resume_action() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();
    engine.run_until_settled("wf-1").await.unwrap();

    // Approving may still amend the record on the way out.
    let edit = StateDelta::new().with_field("solution", json!("approved with tweaks"));
    engine.resume("wf-1", "approve", Some(edit)).await.unwrap();

    let instance = engine.instance("wf-1").unwrap();
    assert_eq!(
        instance.record.get_path("solution"),
        Some(&json!("approved with tweaks"))
    );
    assert_eq!(instance.status, InstanceStatus::Ready(NodeId::End));
}

#[tokio::test]
async fn resuming_a_running_instance_is_an_error() {
    let executor = Arc::new(low_confidence_executor());
    let mut engine = common::engine_for(&breakpoint_document(), executor);
    engine.create_instance("wf-1").await.unwrap();

    assert!(matches!(
        engine.resume("wf-1", "approve", None).await,
        Err(RuntimeError::NotSuspended { .. })
    ));
}
