//! Exhaustive validation of whole document sets.

mod common;

use harmonyspace::document::DocumentSet;
use harmonyspace::validation::{Violation, validate};
use serde_json::json;

use common::fixtures::{router_document, subgraph_parent_document};

#[test]
fn well_formed_fixture_documents_are_clean() {
    let report = validate(&router_document(), &DocumentSet::default());
    assert!(report.is_empty(), "unexpected: {:?}", report.violations());
}

#[test]
fn every_defect_is_reported_in_one_pass() {
    let document = json!({
        // name missing
        "state": {"schema": {"messages": {"type": "list"}}},
        "agents": [{"id": "router"}, {"id": "router"}],
        "human_integration": [{
            "id": "gate",
            "type": "mind_reading",            // invalid enum
            // actions missing
            "routes": {"approve": "ghost"},    // dangling route
        }],
        "flows": [{
            "name": "main",
            "entry_point": "nowhere",          // dangling entry point
            "connections": [
                {"from": "router", "to": "phantom"},  // dangling target
            ],
        }],
        "config": {
            "persistence": {"type": "blockchain"},   // invalid enum
            "streaming": {"mode": "firehose"},       // invalid enum
        },
    });

    let report = validate(&document, &DocumentSet::default());
    let violations = report.violations();

    assert!(violations.iter().any(|v| matches!(
        v, Violation::MissingRequiredField { field, .. } if field == "name")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::DuplicateId { id, .. } if id == "router")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::InvalidEnum { value, .. } if value == "mind_reading")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::MissingRequiredField { field, .. } if field == "actions")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::UnknownReference { reference, .. } if reference == "ghost")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::UnknownReference { reference, .. } if reference == "nowhere")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::UnknownReference { reference, .. } if reference == "phantom")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::InvalidEnum { value, .. } if value == "blockchain")));
    assert!(violations.iter().any(|v| matches!(
        v, Violation::InvalidEnum { value, .. } if value == "firehose")));
    assert!(report.len() >= 9);
}

#[test]
fn reserved_end_keyword_cannot_name_a_node() {
    let mut document = router_document();
    document["agents"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": "end"}));
    let report = validate(&document, &DocumentSet::default());
    assert!(report.violations().iter().any(|v| matches!(
        v, Violation::DuplicateId { id, .. } if id == "end")));
}

#[test]
fn subgraph_documents_are_validated_recursively() {
    let parent = subgraph_parent_document();
    let broken_child = json!({
        "name": "escalation",
        "agents": [{"id": "assess"}],
        "flows": [{
            "name": "main",
            "entry_point": "assess",
            "connections": [{"from": "assess", "to": "missing_node"}],
        }],
    });
    let documents = DocumentSet::new().with_document("escalation_flow", broken_child);

    let report = validate(&parent, &documents);
    assert!(report.violations().iter().any(|v| matches!(
        v,
        Violation::UnknownReference { site, reference }
            if reference == "missing_node" && site.contains("escalation_flow")
    )));
}

#[test]
fn conflicting_schema_types_across_documents_are_rejected() {
    let mut parent = subgraph_parent_document();
    parent["state"]["schema"]["escalated"] = json!({"type": "string"});
    let child = json!({
        "name": "escalation",
        "state": {"schema": {"escalated": {"type": "boolean"}}},
        "agents": [{"id": "assess"}],
        "flows": [{
            "name": "main",
            "entry_point": "assess",
            "connections": [{"from": "assess", "to": "end"}],
        }],
    });
    let documents = DocumentSet::new().with_document("escalation_flow", child);

    let report = validate(&parent, &documents);
    assert!(report.violations().iter().any(|v| matches!(
        v, Violation::SchemaFieldConflict { field, .. } if field == "escalated")));
}
