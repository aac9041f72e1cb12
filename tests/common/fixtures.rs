//! Document fixtures used across the integration suite.

use serde_json::{Value, json};

/// Conditional routing: a router agent picks between tech support and
/// billing by writing `agent_selection.agent_id`.
pub fn router_document() -> Value {
    json!({
        "name": "support",
        "state": {"schema": {
            "messages": {"type": "list"},
            "agent_selection": {
                "type": "object",
                "schema": {"agent_id": {"type": "string"}}
            },
        }},
        "agents": [
            {"id": "router"},
            {"id": "tech_support"},
            {"id": "billing"},
        ],
        "flows": [{
            "name": "main",
            "entry_point": "router",
            "connections": [
                {"from": "router", "to": [
                    {"node": "tech_support",
                     "condition": "state.agent_selection.agent_id == 'tech_support'"},
                    {"node": "billing",
                     "condition": "state.agent_selection.agent_id == 'billing'"},
                ]},
                {"from": "tech_support", "to": "end"},
                {"from": "billing", "to": "end"},
            ],
        }],
    })
}

/// A solver agent followed by a conditional breakpoint: low confidence
/// suspends for approval, with per-action routes.
pub fn breakpoint_document() -> Value {
    json!({
        "name": "review",
        "state": {"schema": {
            "solution": {"type": "string"},
            "solution_confidence": {"type": "number"},
            "approvals": {"type": "list"},
        }},
        "agents": [
            {"id": "solver"},
            {"id": "rework"},
        ],
        "human_integration": [{
            "id": "approval_gate",
            "type": "breakpoint",
            "trigger": "state.solution_confidence < 0.8",
            "actions": ["approve", "reject", "edit_solution"],
            "routes": {
                "approve": "end",
                "reject": "rework",
                "edit_solution": "solver",
            },
        }],
        "flows": [{
            "name": "main",
            "entry_point": "solver",
            "connections": [
                {"from": "solver", "to": "approval_gate"},
                {"from": "approval_gate", "to": "end"},
                {"from": "rework", "to": "end"},
            ],
        }],
    })
}

/// A fan-out of three analysis branches reduced back into one node.
pub fn parallel_document(wait_for_all: bool) -> Value {
    json!({
        "name": "analysis",
        "state": {"schema": {
            "findings": {"type": "list"},
            "winner": {"type": "string"},
        }},
        "agents": [
            {"id": "dispatch"},
            {"id": "fast"},
            {"id": "medium"},
            {"id": "slow"},
            {"id": "summarize"},
        ],
        "flows": [{
            "name": "main",
            "entry_point": "dispatch",
            "connections": [
                {"from": "summarize", "to": "end"},
            ],
            "parallel": [{
                "from": "dispatch",
                "branches": ["fast", "medium", "slow"],
                "wait_for_all": wait_for_all,
                "reducer": if wait_for_all { "merge" } else { "first" },
                "reduce_to": "summarize",
            }],
        }],
    })
}

/// Parent document embedding `escalation_flow` as a subgraph node.
pub fn subgraph_parent_document() -> Value {
    json!({
        "name": "triage",
        "state": {"schema": {
            "log": {"type": "list"},
        }},
        "agents": [{"id": "intake"}],
        "subgraphs": [{"id": "escalation", "source": "escalation_flow"}],
        "flows": [{
            "name": "main",
            "entry_point": "intake",
            "connections": [
                {"from": "intake", "to": "escalation"},
                {"from": "escalation", "to": "end"},
            ],
        }],
    })
}

pub fn escalation_subdocument() -> Value {
    json!({
        "name": "escalation",
        "state": {"schema": {
            "escalated": {"type": "boolean"},
        }},
        "agents": [{"id": "assess"}, {"id": "notify"}],
        "flows": [{
            "name": "main",
            "entry_point": "assess",
            "connections": [
                {"from": "assess", "to": "notify"},
                {"from": "notify", "to": "end"},
            ],
        }],
    })
}
