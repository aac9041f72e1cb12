//! The execution runtime: engine, instances, checkpoints, configuration.
//!
//! One [`Engine`] executes one compiled flow for any number of concurrently
//! created instances. Instances advance step by step ([`Engine::step`] /
//! [`Engine::run_until_settled`]), suspend at human-integration nodes, resume
//! via [`Engine::resume`], and persist through the [`CheckpointStore`] port.

mod checkpoint;
mod config;
mod engine;
mod instance;
pub mod persistence;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, Cursor, InMemoryCheckpointStore,
};
pub use config::{PersistenceKind, RuntimeConfig};
pub use engine::{CancelHandle, Engine, RuntimeError, StepReport};
pub use instance::{Fault, FaultKind, InstanceInit, InstanceStatus, WorkflowInstance};
