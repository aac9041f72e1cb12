//! # HarmonySpace: Declarative Agent-Flow Compiler and Graph Runtime
//!
//! HarmonySpace turns a declarative agent-flow document (an already-parsed
//! nested mapping/sequence tree) into a validated, executable directed graph,
//! and executes that graph: routing between nodes by condition evaluation,
//! fanning out to parallel branches and reducing their results, suspending for
//! human intervention, checkpointing state, and streaming execution events.
//!
//! ## Core Concepts
//!
//! - **Document**: The parsed flow description, validated exhaustively before
//!   any graph is built
//! - **StateSchema / StateRecord**: Typed field layout with defaults, and the
//!   per-instance mutable record shaped by it
//! - **Graph**: Immutable compiled topology (nodes, conditional edges,
//!   parallel groups, entry point, terminal marker), shared read-only across
//!   concurrent workflow instances
//! - **Predicate**: Conditions stored as a small typed expression tree, never
//!   as executable text
//! - **Engine**: A per-instance state machine that advances state, applies
//!   checkpoints, emits stream events, and suspends at human-integration
//!   points
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harmonyspace::compiler::compile;
//! use harmonyspace::document::DocumentSet;
//! use harmonyspace::reducers::ReducerRegistry;
//! use harmonyspace::runtime::{Engine, InMemoryCheckpointStore, RuntimeConfig};
//! # use harmonyspace::executor::NodeExecutor;
//! # async fn example(document: serde_json::Value, executor: Arc<dyn NodeExecutor>) -> miette::Result<()> {
//!
//! let reducers = ReducerRegistry::default();
//! let flow = compile(&document, &DocumentSet::default(), &reducers)?;
//!
//! let mut engine = Engine::new(
//!     flow,
//!     executor,
//!     Arc::new(reducers),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     RuntimeConfig::default(),
//! );
//! engine.create_instance("instance-1").await?;
//! engine.run_until_settled("instance-1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`document`] - Parsed-document access and the subgraph document source
//! - [`validation`] - Exhaustive structural validation with aggregated reports
//! - [`schema`] - State schema compilation and zero-value records
//! - [`state`] - State records, deltas, and field-level merge rules
//! - [`condition`] - Typed predicate trees and total evaluation
//! - [`graph`] - Node variants, edges, parallel groups, graph compilation
//! - [`compiler`] - The validate → schema → graph pipeline
//! - [`executor`] - The node executor port consumed by the engine
//! - [`reducers`] - Named reducers combining parallel branch results
//! - [`runtime`] - The execution engine, checkpoint store port, and config
//! - [`streaming`] - Stream events, sinks, and the event bus

pub mod compiler;
pub mod condition;
pub mod document;
pub mod executor;
pub mod graph;
pub mod reducers;
pub mod runtime;
pub mod schema;
pub mod state;
pub mod streaming;
pub mod telemetry;
pub mod validation;
