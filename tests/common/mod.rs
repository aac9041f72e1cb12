//! Shared helpers for the integration suite.

#![allow(dead_code)]

pub mod executors;
pub mod fixtures;

use std::sync::Arc;

use harmonyspace::compiler::{CompiledFlow, compile};
use harmonyspace::document::DocumentSet;
use harmonyspace::executor::NodeExecutor;
use harmonyspace::reducers::ReducerRegistry;
use harmonyspace::runtime::{Engine, InMemoryCheckpointStore, RuntimeConfig};
use serde_json::Value;

/// Compile a document with default reducers and no subgraphs, panicking on
/// any compile error.
pub fn compile_flow(document: &Value) -> CompiledFlow {
    compile(document, &DocumentSet::default(), &ReducerRegistry::default())
        .expect("fixture document should compile")
}

pub fn compile_flow_with(document: &Value, documents: &DocumentSet) -> CompiledFlow {
    compile(document, documents, &ReducerRegistry::default())
        .expect("fixture document should compile")
}

/// Engine over a fresh in-memory store with the document's own runtime
/// config.
pub fn engine_for(document: &Value, executor: Arc<dyn NodeExecutor>) -> Engine {
    let flow = compile_flow(document);
    Engine::new(
        flow,
        executor,
        Arc::new(ReducerRegistry::default()),
        Arc::new(InMemoryCheckpointStore::new()),
        RuntimeConfig::from_document(document),
    )
}

/// Engine sharing a caller-owned store, for restore-path tests.
pub fn engine_with_store(
    document: &Value,
    executor: Arc<dyn NodeExecutor>,
    store: Arc<InMemoryCheckpointStore>,
) -> Engine {
    let flow = compile_flow(document);
    Engine::new(
        flow,
        executor,
        Arc::new(ReducerRegistry::default()),
        store,
        RuntimeConfig::from_document(document),
    )
}
