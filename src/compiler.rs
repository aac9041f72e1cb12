//! The top-level compilation pipeline: validate, compile the state schema,
//! build the graph.
//!
//! Validation runs first and aborts wholesale on a non-empty report, so the
//! later stages only ever see structurally sound documents. The state schema
//! is merged across the top-level document and every subgraph document
//! (subgraphs share the parent's state record), then the graph is built
//! recursively.

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::document::{DocumentSet, get_map, get_seq, get_str};
use crate::graph::{CompileError, Graph, GraphBuilder};
use crate::reducers::ReducerRegistry;
use crate::schema::StateSchema;
use crate::validation::validate;

/// The product of compilation, shared read-only across workflow instances.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub graph: Arc<Graph>,
    pub schema: Arc<StateSchema>,
}

/// Compile a parsed top-level document (plus its subgraph documents) into an
/// executable flow.
#[instrument(skip_all, fields(document = get_str(document, "name").unwrap_or("unnamed")), err)]
pub fn compile(
    document: &Value,
    documents: &DocumentSet,
    reducers: &ReducerRegistry,
) -> Result<CompiledFlow, CompileError> {
    validate(document, documents).into_result()?;

    let mut schema = StateSchema::default();
    absorb_schemas(document, documents, &mut schema, &mut Vec::new())?;

    let graph = GraphBuilder::new(documents, reducers).build(document)?;

    Ok(CompiledFlow {
        graph: Arc::new(graph),
        schema: Arc::new(schema),
    })
}

/// Fold the `state.schema` blocks of a document and all its subgraph
/// documents into one schema. Cross-document type conflicts were already
/// rejected by validation, so later identical declarations are skipped.
fn absorb_schemas(
    document: &Value,
    documents: &DocumentSet,
    schema: &mut StateSchema,
    visited: &mut Vec<String>,
) -> Result<(), CompileError> {
    if let Some(state) = document.get("state")
        && let Some(map) = get_map(state, "schema")
    {
        schema.absorb(StateSchema::compile(map)?);
    }

    let Some(entries) = get_seq(document, "subgraphs") else {
        return Ok(());
    };
    for entry in entries {
        let Some(source) = get_str(entry, "source") else {
            continue;
        };
        if visited.iter().any(|seen| seen == source) {
            continue;
        }
        if let Some(subdocument) = documents.get(source) {
            visited.push(source.to_string());
            absorb_schemas(subdocument, documents, schema, visited)?;
            visited.pop();
        }
    }
    Ok(())
}
