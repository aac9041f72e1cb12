//! Exhaustive structural validation of flow documents.
//!
//! The validator walks the whole parsed tree and collects *every* defect into
//! a [`ValidationReport`] instead of stopping at the first one, so a document
//! author sees all problems in one pass. Compilation aborts wholesale when the
//! report is non-empty.
//!
//! Checks cover required fields, closed enums (node types, persistence kinds,
//! stream modes), duplicate identifiers, dangling references (edges, routes,
//! entry points, parallel branches, subgraph sources), and state-schema field
//! conflicts across the top-level document and its subgraph documents.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::document::{DocumentSet, get_map, get_seq, get_str};

/// Node type keywords accepted in `human_integration` entries.
pub const HUMAN_INTEGRATION_TYPES: &[&str] = &[
    "breakpoint",
    "wait_user_input",
    "edit_state",
    "review_tool_calls",
    "time_travel",
];

/// Persistence backend keywords accepted in `config.persistence.type`.
pub const PERSISTENCE_TYPES: &[&str] = &["memory", "keyed_store", "relational", "document"];

/// Stream mode keywords accepted in `config.streaming.mode`.
pub const STREAM_MODES: &[&str] = &["tokens", "messages", "events", "values"];

/// One structural defect found in a document.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum Violation {
    /// A node id, entry point, route target, branch, or subgraph source names
    /// something that does not exist.
    #[error("unknown reference `{reference}` at {site}")]
    #[diagnostic(code(harmonyspace::validation::unknown_reference))]
    UnknownReference { site: String, reference: String },

    /// The same identifier declared twice within one namespace.
    #[error("duplicate id `{id}` in {scope}")]
    #[diagnostic(code(harmonyspace::validation::duplicate_id))]
    DuplicateId { scope: String, id: String },

    /// A mapping lacks a field the format requires.
    #[error("missing required field `{field}` at {location}")]
    #[diagnostic(code(harmonyspace::validation::missing_required_field))]
    MissingRequiredField { location: String, field: String },

    /// A closed-enum field holds a keyword outside its set.
    #[error("invalid value `{value}` for `{field}` at {location} (allowed: {})", allowed.join(", "))]
    #[diagnostic(code(harmonyspace::validation::invalid_enum))]
    InvalidEnum {
        location: String,
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    /// The same state field declared with different types in two documents.
    #[error("state field `{field}` declared as {first} and as {second}")]
    #[diagnostic(
        code(harmonyspace::validation::schema_field_conflict),
        help("Subgraphs share the parent's state; every declaration of a field must agree on its type.")
    )]
    SchemaFieldConflict {
        field: String,
        first: String,
        second: String,
    },
}

/// Every defect found in one validation pass.
#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Convert into a result: `Ok` when clean, the aggregated
    /// [`ValidationError`] otherwise.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.violations,
            })
        }
    }
}

/// Aggregated validation failure: the document is rejected wholesale with
/// every violation attached as a related diagnostic.
#[derive(Debug, Error, Diagnostic)]
#[error("document failed validation with {} violation(s)", violations.len())]
#[diagnostic(code(harmonyspace::validation::rejected))]
pub struct ValidationError {
    #[related]
    pub violations: Vec<Violation>,
}

/// Validate a top-level document (and, recursively, every subgraph document it
/// references) against the flow-document format.
#[must_use]
pub fn validate(document: &Value, documents: &DocumentSet) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut schema_declarations: FxHashMap<String, (String, String)> = FxHashMap::default();
    let mut visited_sources: Vec<String> = Vec::new();
    validate_document(
        document,
        documents,
        "document",
        &mut report,
        &mut schema_declarations,
        &mut visited_sources,
    );
    report
}

fn validate_document(
    document: &Value,
    documents: &DocumentSet,
    doc_label: &str,
    report: &mut ValidationReport,
    schema_declarations: &mut FxHashMap<String, (String, String)>,
    visited_sources: &mut Vec<String>,
) {
    if get_str(document, "name").is_none() {
        report.push(Violation::MissingRequiredField {
            location: doc_label.to_string(),
            field: "name".into(),
        });
    }

    let node_ids = collect_node_ids(document, doc_label, report);

    validate_schema_block(document, doc_label, report, schema_declarations);
    validate_human_integration(document, doc_label, &node_ids, report);
    validate_flows(document, doc_label, &node_ids, report);
    validate_config(document, doc_label, report);
    validate_subgraphs(
        document,
        documents,
        doc_label,
        report,
        schema_declarations,
        visited_sources,
    );
}

/// Gather the document's node-id namespace (agents, human-integration nodes,
/// subgraphs) while reporting missing ids and duplicates.
fn collect_node_ids(
    document: &Value,
    doc_label: &str,
    report: &mut ValidationReport,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for section in ["agents", "human_integration", "subgraphs"] {
        let Some(entries) = get_seq(document, section) else {
            continue;
        };
        for (index, entry) in entries.iter().enumerate() {
            let location = format!("{doc_label}.{section}[{index}]");
            match get_str(entry, "id") {
                Some(id) => {
                    if id == "end" || ids.iter().any(|existing| existing == id) {
                        report.push(Violation::DuplicateId {
                            scope: format!("{doc_label} nodes"),
                            id: id.to_string(),
                        });
                    } else {
                        ids.push(id.to_string());
                    }
                }
                None => report.push(Violation::MissingRequiredField {
                    location,
                    field: "id".into(),
                }),
            }
        }
    }
    ids
}

fn validate_schema_block(
    document: &Value,
    doc_label: &str,
    report: &mut ValidationReport,
    schema_declarations: &mut FxHashMap<String, (String, String)>,
) {
    let Some(state) = document.get("state") else {
        return;
    };
    let Some(schema) = get_map(state, "schema") else {
        report.push(Violation::MissingRequiredField {
            location: format!("{doc_label}.state"),
            field: "schema".into(),
        });
        return;
    };

    for (field, entry) in schema {
        let location = format!("{doc_label}.state.schema.{field}");
        let Some(keyword) = get_str(entry, "type") else {
            report.push(Violation::MissingRequiredField {
                location,
                field: "type".into(),
            });
            continue;
        };
        // Type-keyword validity and default typing are the schema compiler's
        // concern; cross-document agreement is checked here.
        match schema_declarations.get(field) {
            Some((first_label, first_keyword)) if first_keyword != keyword => {
                report.push(Violation::SchemaFieldConflict {
                    field: field.clone(),
                    first: format!("{first_keyword} (in {first_label})"),
                    second: format!("{keyword} (in {doc_label})"),
                });
            }
            Some(_) => {}
            None => {
                schema_declarations
                    .insert(field.clone(), (doc_label.to_string(), keyword.to_string()));
            }
        }
    }
}

fn validate_human_integration(
    document: &Value,
    doc_label: &str,
    node_ids: &[String],
    report: &mut ValidationReport,
) {
    let Some(entries) = get_seq(document, "human_integration") else {
        return;
    };
    for (index, entry) in entries.iter().enumerate() {
        let location = format!("{doc_label}.human_integration[{index}]");

        match get_str(entry, "type") {
            Some(kind) if !HUMAN_INTEGRATION_TYPES.contains(&kind) => {
                report.push(Violation::InvalidEnum {
                    location: location.clone(),
                    field: "type".into(),
                    value: kind.to_string(),
                    allowed: HUMAN_INTEGRATION_TYPES.iter().map(ToString::to_string).collect(),
                });
            }
            Some(_) => {}
            None => report.push(Violation::MissingRequiredField {
                location: location.clone(),
                field: "type".into(),
            }),
        }

        if get_seq(entry, "actions").is_none() {
            report.push(Violation::MissingRequiredField {
                location: location.clone(),
                field: "actions".into(),
            });
        }

        if let Some(routes) = get_map(entry, "routes") {
            for (action, target) in routes {
                let Some(target) = target.as_str() else {
                    report.push(Violation::UnknownReference {
                        site: format!("{location}.routes.{action}"),
                        reference: target.to_string(),
                    });
                    continue;
                };
                check_node_reference(
                    target,
                    node_ids,
                    &format!("{location}.routes.{action}"),
                    report,
                );
            }
        }
    }
}

fn validate_flows(
    document: &Value,
    doc_label: &str,
    node_ids: &[String],
    report: &mut ValidationReport,
) {
    let Some(flows) = get_seq(document, "flows") else {
        report.push(Violation::MissingRequiredField {
            location: doc_label.to_string(),
            field: "flows".into(),
        });
        return;
    };

    let mut flow_names: Vec<String> = Vec::new();
    for (index, flow) in flows.iter().enumerate() {
        let location = format!("{doc_label}.flows[{index}]");

        match get_str(flow, "name") {
            Some(name) => {
                if flow_names.iter().any(|existing| existing == name) {
                    report.push(Violation::DuplicateId {
                        scope: format!("{doc_label} flows"),
                        id: name.to_string(),
                    });
                } else {
                    flow_names.push(name.to_string());
                }
            }
            None => report.push(Violation::MissingRequiredField {
                location: location.clone(),
                field: "name".into(),
            }),
        }

        match get_str(flow, "entry_point") {
            Some(entry) => {
                if !node_ids.iter().any(|id| id == entry) {
                    report.push(Violation::UnknownReference {
                        site: format!("{location}.entry_point"),
                        reference: entry.to_string(),
                    });
                }
            }
            None => report.push(Violation::MissingRequiredField {
                location: location.clone(),
                field: "entry_point".into(),
            }),
        }

        if let Some(connections) = get_seq(flow, "connections") {
            for (ci, connection) in connections.iter().enumerate() {
                validate_connection(
                    connection,
                    node_ids,
                    &format!("{location}.connections[{ci}]"),
                    report,
                );
            }
        }

        if let Some(parallels) = get_seq(flow, "parallel") {
            for (pi, parallel) in parallels.iter().enumerate() {
                validate_parallel(
                    parallel,
                    node_ids,
                    &format!("{location}.parallel[{pi}]"),
                    report,
                );
            }
        }
    }
}

fn validate_connection(
    connection: &Value,
    node_ids: &[String],
    location: &str,
    report: &mut ValidationReport,
) {
    match get_str(connection, "from") {
        Some(from) => {
            if !node_ids.iter().any(|id| id == from) {
                report.push(Violation::UnknownReference {
                    site: format!("{location}.from"),
                    reference: from.to_string(),
                });
            }
        }
        None => report.push(Violation::MissingRequiredField {
            location: location.to_string(),
            field: "from".into(),
        }),
    }

    match connection.get("to") {
        Some(Value::String(to)) => {
            check_node_reference(to, node_ids, &format!("{location}.to"), report);
        }
        Some(Value::Array(targets)) => {
            for (ti, target) in targets.iter().enumerate() {
                let target_location = format!("{location}.to[{ti}]");
                match get_str(target, "node") {
                    Some(node) => {
                        check_node_reference(node, node_ids, &target_location, report);
                    }
                    None => report.push(Violation::MissingRequiredField {
                        location: target_location.clone(),
                        field: "node".into(),
                    }),
                }
                if get_str(target, "condition").is_none() {
                    report.push(Violation::MissingRequiredField {
                        location: target_location,
                        field: "condition".into(),
                    });
                }
            }
        }
        _ => report.push(Violation::MissingRequiredField {
            location: location.to_string(),
            field: "to".into(),
        }),
    }
}

fn validate_parallel(
    parallel: &Value,
    node_ids: &[String],
    location: &str,
    report: &mut ValidationReport,
) {
    for field in ["from", "reducer", "reduce_to"] {
        if get_str(parallel, field).is_none() {
            report.push(Violation::MissingRequiredField {
                location: location.to_string(),
                field: field.into(),
            });
        }
    }

    if let Some(from) = get_str(parallel, "from")
        && !node_ids.iter().any(|id| id == from)
    {
        report.push(Violation::UnknownReference {
            site: format!("{location}.from"),
            reference: from.to_string(),
        });
    }

    if let Some(reduce_to) = get_str(parallel, "reduce_to") {
        check_node_reference(reduce_to, node_ids, &format!("{location}.reduce_to"), report);
    }

    match get_seq(parallel, "branches") {
        Some(branches) => {
            for (bi, branch) in branches.iter().enumerate() {
                let site = format!("{location}.branches[{bi}]");
                match branch.as_str() {
                    // Branches must be real nodes; `end` is not a branch.
                    Some(branch) if node_ids.iter().any(|id| id == branch) => {}
                    Some(branch) => report.push(Violation::UnknownReference {
                        site,
                        reference: branch.to_string(),
                    }),
                    None => report.push(Violation::UnknownReference {
                        site,
                        reference: branch.to_string(),
                    }),
                }
            }
        }
        None => report.push(Violation::MissingRequiredField {
            location: location.to_string(),
            field: "branches".into(),
        }),
    }
}

fn validate_config(document: &Value, doc_label: &str, report: &mut ValidationReport) {
    let Some(config) = document.get("config") else {
        return;
    };

    if let Some(persistence) = config.get("persistence") {
        let location = format!("{doc_label}.config.persistence");
        match get_str(persistence, "type") {
            Some(kind) if !PERSISTENCE_TYPES.contains(&kind) => {
                report.push(Violation::InvalidEnum {
                    location,
                    field: "type".into(),
                    value: kind.to_string(),
                    allowed: PERSISTENCE_TYPES.iter().map(ToString::to_string).collect(),
                });
            }
            Some(_) => {}
            None => report.push(Violation::MissingRequiredField {
                location,
                field: "type".into(),
            }),
        }
    }

    if let Some(streaming) = config.get("streaming") {
        let location = format!("{doc_label}.config.streaming");
        match get_str(streaming, "mode") {
            Some(mode) if !STREAM_MODES.contains(&mode) => {
                report.push(Violation::InvalidEnum {
                    location,
                    field: "mode".into(),
                    value: mode.to_string(),
                    allowed: STREAM_MODES.iter().map(ToString::to_string).collect(),
                });
            }
            Some(_) => {}
            None => report.push(Violation::MissingRequiredField {
                location,
                field: "mode".into(),
            }),
        }
    }
}

fn validate_subgraphs(
    document: &Value,
    documents: &DocumentSet,
    doc_label: &str,
    report: &mut ValidationReport,
    schema_declarations: &mut FxHashMap<String, (String, String)>,
    visited_sources: &mut Vec<String>,
) {
    let Some(entries) = get_seq(document, "subgraphs") else {
        return;
    };
    for (index, entry) in entries.iter().enumerate() {
        let location = format!("{doc_label}.subgraphs[{index}]");
        let Some(source) = get_str(entry, "source") else {
            report.push(Violation::MissingRequiredField {
                location,
                field: "source".into(),
            });
            continue;
        };
        let Some(subdocument) = documents.get(source) else {
            report.push(Violation::UnknownReference {
                site: format!("{location}.source"),
                reference: source.to_string(),
            });
            continue;
        };
        // A source already on the path means a subgraph cycle; report once and
        // stop descending.
        if visited_sources.iter().any(|seen| seen == source) {
            report.push(Violation::UnknownReference {
                site: format!("{location}.source"),
                reference: format!("{source} (cyclic subgraph reference)"),
            });
            continue;
        }
        visited_sources.push(source.to_string());
        validate_document(
            subdocument,
            documents,
            &format!("subgraph `{source}`"),
            report,
            schema_declarations,
            visited_sources,
        );
        visited_sources.pop();
    }
}

/// A node reference is valid when it names a declared node or the `end`
/// keyword.
fn check_node_reference(
    reference: &str,
    node_ids: &[String],
    site: &str,
    report: &mut ValidationReport,
) {
    if reference != "end" && !node_ids.iter().any(|id| id == reference) {
        report.push(Violation::UnknownReference {
            site: site.to_string(),
            reference: reference.to_string(),
        });
    }
}
