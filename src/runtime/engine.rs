//! The execution engine: a per-instance state machine over a compiled flow.
//!
//! Each step moves one instance's cursor: executing an agent through the
//! executor port, fanning out a parallel group, suspending at a
//! human-integration node, or terminating at the marker. The compiled graph is
//! shared immutably; all mutation happens on the instance's own record via
//! delta application. Checkpoints are awaited inside the step loop, after the
//! delta is applied and before any later step's events, so an observer never
//! sees progress that could not be restored.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, Cursor};
use super::config::RuntimeConfig;
use super::instance::{Fault, InstanceInit, InstanceStatus, WorkflowInstance};
use crate::compiler::CompiledFlow;
use crate::executor::{ExecutorContext, NodeExecutor};
use crate::graph::{
    AgentNode, Graph, HumanIntegrationNode, NodeId, NodeSpec, ParallelGroup, SubgraphNode,
};
use crate::reducers::ReducerRegistry;
use crate::state::{StateDelta, StateRecord};
use crate::streaming::{
    EventBus, EventEmitter, StreamEvent, StreamEventKind, StreamMode, StreamSink,
};

/// Engine-level failures: caller misuse and persistence faults.
///
/// Node failures and routing dead ends do not surface here; they fault the
/// instance and come back as [`StepReport::Faulted`].
#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("unknown instance `{instance_id}`")]
    #[diagnostic(code(harmonyspace::runtime::unknown_instance))]
    UnknownInstance { instance_id: String },

    #[error("instance `{instance_id}` already exists in this engine")]
    #[diagnostic(code(harmonyspace::runtime::instance_already_exists))]
    InstanceAlreadyExists { instance_id: String },

    #[error("instance `{instance_id}` is not suspended")]
    #[diagnostic(
        code(harmonyspace::runtime::not_suspended),
        help("Only a suspended instance can be resumed; drive others with `step` or `run_until_settled`.")
    )]
    NotSuspended { instance_id: String },

    /// The resume action is not in the suspension point's allowed set. The
    /// instance stays suspended unchanged.
    #[error("resume action `{action}` is not allowed here (allowed: {})", allowed.join(", "))]
    #[diagnostic(code(harmonyspace::runtime::invalid_resume_action))]
    InvalidResumeAction { action: String, allowed: Vec<String> },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// What one engine step did.
#[derive(Clone, Debug, PartialEq)]
pub enum StepReport {
    /// An agent or subgraph node completed and the cursor moved on.
    Advanced { node: String, next: NodeId },
    /// A parallel group fanned out, reduced, and the cursor moved to the
    /// reduce target.
    ParallelReduced {
        group_from: String,
        branches: usize,
        next: NodeId,
    },
    /// Suspended at a human-integration node awaiting a resume.
    Suspended {
        node: String,
        allowed_actions: Vec<String>,
    },
    /// A human-integration node whose trigger did not hold was passed through
    /// transparently.
    PassedThrough { node: String, next: NodeId },
    Terminated,
    Cancelled,
    Faulted { node: String, fault: Fault },
    /// The instance is settled or suspended; the step changed nothing.
    Idle,
}

impl StepReport {
    /// Whether the step loop should keep going.
    #[must_use]
    pub fn wants_another_step(&self) -> bool {
        matches!(
            self,
            Self::Advanced { .. } | Self::ParallelReduced { .. } | Self::PassedThrough { .. }
        )
    }
}

/// Cooperative cancellation handle for one instance.
///
/// Cancelling stops new invocations at the next step boundary and aborts
/// in-flight parallel branch tasks; the last persisted checkpoint stays
/// valid.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Executes compiled flows: one engine per flow, many instances per engine.
pub struct Engine {
    flow: CompiledFlow,
    executor: Arc<dyn NodeExecutor>,
    reducers: Arc<ReducerRegistry>,
    store: Arc<dyn CheckpointStore>,
    bus: EventBus,
    config: RuntimeConfig,
    instances: FxHashMap<String, WorkflowInstance>,
    cancel_handles: FxHashMap<String, CancelHandle>,
}

impl Engine {
    #[must_use]
    pub fn new(
        flow: CompiledFlow,
        executor: Arc<dyn NodeExecutor>,
        reducers: Arc<ReducerRegistry>,
        store: Arc<dyn CheckpointStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            flow,
            executor,
            reducers,
            store,
            bus: EventBus::new(),
            config,
            instances: FxHashMap::default(),
            cancel_handles: FxHashMap::default(),
        }
    }

    pub fn add_sink(&self, sink: Box<dyn StreamSink>) {
        self.bus.add_sink(sink);
    }

    /// Start the background event delivery task.
    pub fn listen_for_events(&mut self) -> tokio::task::JoinHandle<()> {
        self.bus.listen_for_events()
    }

    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<&WorkflowInstance> {
        self.instances.get(instance_id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &WorkflowInstance> {
        self.instances.values()
    }

    /// Instance ids with a surviving checkpoint in the store, whether or not
    /// this engine currently holds them.
    pub async fn persisted_instances(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.store.list_instances().await?)
    }

    /// Cancellation handle for an instance; cloneable and usable from other
    /// tasks.
    pub fn cancel_handle(&self, instance_id: &str) -> Result<CancelHandle, RuntimeError> {
        self.cancel_handles
            .get(instance_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownInstance {
                instance_id: instance_id.to_string(),
            })
    }

    /// Create or restore an instance under the given id.
    ///
    /// When the store holds a checkpoint for the id, the instance resumes
    /// from it: record, cursor, step and sequence all continue. Otherwise the
    /// instance starts fresh from schema defaults at the entry point, and an
    /// initial checkpoint is persisted before the call returns.
    #[instrument(skip(self), err)]
    pub async fn create_instance(
        &mut self,
        instance_id: &str,
    ) -> Result<InstanceInit, RuntimeError> {
        if self.instances.contains_key(instance_id) {
            return Err(RuntimeError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        let init = match self.store.load(instance_id).await? {
            Some(checkpoint) => {
                let status = self.status_from_cursor(&checkpoint.cursor);
                self.instances.insert(
                    instance_id.to_string(),
                    WorkflowInstance {
                        id: instance_id.to_string(),
                        record: checkpoint.record,
                        status,
                        step: checkpoint.step,
                        checkpoint_seq: checkpoint.sequence,
                    },
                );
                debug!(instance_id, sequence = checkpoint.sequence, "restored instance");
                InstanceInit::Resumed
            }
            None => {
                let record = self.flow.schema.zero_record();
                let mut instance =
                    WorkflowInstance::fresh(instance_id, record, self.flow.graph.entry());
                self.save_checkpoint(&mut instance).await?;
                self.instances.insert(instance_id.to_string(), instance);
                debug!(instance_id, "created fresh instance");
                InstanceInit::Fresh
            }
        };
        self.cancel_handles
            .insert(instance_id.to_string(), CancelHandle::default());
        Ok(init)
    }

    /// Create an instance under a generated unique id.
    pub async fn create_instance_auto(&mut self) -> Result<String, RuntimeError> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        self.create_instance(&instance_id).await?;
        Ok(instance_id)
    }

    /// Request cancellation of an instance.
    pub fn cancel(&self, instance_id: &str) -> Result<(), RuntimeError> {
        self.cancel_handle(instance_id)?.cancel();
        Ok(())
    }

    /// Advance an instance by one step.
    #[instrument(skip(self), err)]
    pub async fn step(&mut self, instance_id: &str) -> Result<StepReport, RuntimeError> {
        let mut instance = self.instances.remove(instance_id).ok_or_else(|| {
            RuntimeError::UnknownInstance {
                instance_id: instance_id.to_string(),
            }
        })?;
        let report = self.step_instance(&mut instance).await;
        self.instances.insert(instance_id.to_string(), instance);
        report
    }

    /// Step until the instance settles or suspends.
    #[instrument(skip(self), err)]
    pub async fn run_until_settled(
        &mut self,
        instance_id: &str,
    ) -> Result<StepReport, RuntimeError> {
        loop {
            let report = self.step(instance_id).await?;
            if !report.wants_another_step() {
                return Ok(report);
            }
        }
    }

    /// Resume a suspended instance with one of its allowed actions.
    ///
    /// An `edit` delta, when supplied, is applied to the record before
    /// routing, whatever the action: `edit_state` nodes are the usual
    /// source, but any suspension point accepts an amended record on
    /// resume. Routing prefers the node's
    /// per-action route; otherwise the node's outgoing edges decide. A
    /// disallowed action returns [`RuntimeError::InvalidResumeAction`] and
    /// leaves the instance suspended unchanged.
    #[instrument(skip(self, edit), err)]
    pub async fn resume(
        &mut self,
        instance_id: &str,
        action: &str,
        edit: Option<StateDelta>,
    ) -> Result<StepReport, RuntimeError> {
        let mut instance = self.instances.remove(instance_id).ok_or_else(|| {
            RuntimeError::UnknownInstance {
                instance_id: instance_id.to_string(),
            }
        })?;
        let report = self.resume_instance(&mut instance, action, edit).await;
        self.instances.insert(instance_id.to_string(), instance);
        report
    }

    async fn resume_instance(
        &self,
        instance: &mut WorkflowInstance,
        action: &str,
        edit: Option<StateDelta>,
    ) -> Result<StepReport, RuntimeError> {
        let InstanceStatus::Suspended { node, .. } = &instance.status else {
            return Err(RuntimeError::NotSuspended {
                instance_id: instance.id.clone(),
            });
        };
        let node_id = node.clone();

        let Some(NodeSpec::HumanIntegration(node)) = self.flow.graph.node(&node_id) else {
            return Ok(self
                .fault(
                    instance,
                    &node_id,
                    Fault::routing(format!(
                        "suspension node `{node_id}` is missing from the graph"
                    )),
                )
                .await);
        };
        if !node.accepts_action(action) {
            return Err(RuntimeError::InvalidResumeAction {
                action: action.to_string(),
                allowed: node.actions.clone(),
            });
        }

        if let Some(delta) = edit {
            instance.record.apply(&delta);
        }
        self.emit_lifecycle(
            &instance.id,
            StreamEventKind::Resumed {
                node_id: node_id.clone(),
                action: action.to_string(),
            },
        );

        let next = match node.routes.get(action) {
            Some(next) => next.clone(),
            None => match route_from(&self.flow.graph, &node_id, &instance.record) {
                Ok(next) => next,
                Err(error) => return Ok(self.fault(instance, &node_id, error).await),
            },
        };

        instance.status = InstanceStatus::Ready(next.clone());
        instance.step += 1;
        self.save_checkpoint(instance).await?;
        Ok(StepReport::Advanced {
            node: node_id,
            next,
        })
    }

    async fn step_instance(
        &self,
        instance: &mut WorkflowInstance,
    ) -> Result<StepReport, RuntimeError> {
        if self
            .cancel_handles
            .get(&instance.id)
            .is_some_and(CancelHandle::is_cancelled)
        {
            return Ok(self.mark_cancelled(instance));
        }

        let current = match &instance.status {
            InstanceStatus::Ready(node) => node.clone(),
            InstanceStatus::Running(node) => node.clone(),
            _ => return Ok(StepReport::Idle),
        };

        match current {
            NodeId::End => {
                instance.status = InstanceStatus::Terminated;
                self.save_checkpoint(instance).await?;
                self.emit_lifecycle(&instance.id, StreamEventKind::Terminated);
                Ok(StepReport::Terminated)
            }
            NodeId::Named(node_id) => {
                let Some(spec) = self.flow.graph.node(&node_id) else {
                    return Ok(self
                        .fault(
                            instance,
                            &node_id,
                            Fault::routing(format!(
                                "node `{node_id}` is missing from the graph"
                            )),
                        )
                        .await);
                };
                match spec {
                    NodeSpec::HumanIntegration(node) => {
                        self.step_human(instance, node).await
                    }
                    NodeSpec::Agent(node) => self.step_agent(instance, node).await,
                    NodeSpec::Subgraph(node) => self.step_subgraph(instance, node).await,
                }
            }
        }
    }

    async fn step_human(
        &self,
        instance: &mut WorkflowInstance,
        node: &HumanIntegrationNode,
    ) -> Result<StepReport, RuntimeError> {
        let triggered = match &node.trigger {
            None => true,
            Some(predicate) => match predicate.eval(&instance.record) {
                Ok(triggered) => triggered,
                Err(error) => {
                    return Ok(self
                        .fault(instance, &node.id, Fault::condition(error.to_string()))
                        .await);
                }
            },
        };

        if triggered {
            instance.status = InstanceStatus::Suspended {
                node: node.id.clone(),
                allowed_actions: node.actions.clone(),
            };
            self.save_checkpoint(instance).await?;
            self.emit_lifecycle(
                &instance.id,
                StreamEventKind::Suspended {
                    node_id: node.id.clone(),
                    allowed_actions: node.actions.clone(),
                },
            );
            Ok(StepReport::Suspended {
                node: node.id.clone(),
                allowed_actions: node.actions.clone(),
            })
        } else {
            // Trigger does not hold: the node is transparent.
            match route_from(&self.flow.graph, &node.id, &instance.record) {
                Ok(next) => {
                    instance.status = InstanceStatus::Ready(next.clone());
                    Ok(StepReport::PassedThrough {
                        node: node.id.clone(),
                        next,
                    })
                }
                Err(error) => Ok(self.fault(instance, &node.id, error).await),
            }
        }
    }

    async fn step_agent(
        &self,
        instance: &mut WorkflowInstance,
        node: &AgentNode,
    ) -> Result<StepReport, RuntimeError> {
        instance.status = InstanceStatus::Running(NodeId::Named(node.id.clone()));
        self.emit_filtered(
            &instance.id,
            StreamEventKind::NodeStarted {
                node_id: node.id.clone(),
                step: instance.step,
            },
        );

        let ctx = ExecutorContext::new(
            instance.id.clone(),
            node.id.clone(),
            instance.step,
            self.config.stream_mode,
            self.executor_emitter(&node.id),
        );
        let result = self
            .executor
            .invoke(node, instance.record.clone(), ctx)
            .await;

        match result {
            Err(error) => Ok(self
                .fault(instance, &node.id, Fault::executor(error.to_string()))
                .await),
            Ok(delta) => {
                self.apply_and_emit(instance, &node.id, &delta);
                self.advance_from(instance, &node.id).await
            }
        }
    }

    async fn step_subgraph(
        &self,
        instance: &mut WorkflowInstance,
        node: &SubgraphNode,
    ) -> Result<StepReport, RuntimeError> {
        instance.status = InstanceStatus::Running(NodeId::Named(node.id.clone()));
        self.emit_filtered(
            &instance.id,
            StreamEventKind::NodeStarted {
                node_id: node.id.clone(),
                step: instance.step,
            },
        );

        let input = instance.record.clone();
        let terminal = execute_graph(
            Arc::clone(&node.graph),
            input.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.reducers),
            instance.id.clone(),
            instance.step,
            self.config.stream_mode,
            self.executor_emitter(&node.id),
            self.cancel_handle_for(&instance.id),
        )
        .await;

        match terminal {
            Err(GroupError::Cancelled) => Ok(self.mark_cancelled(instance)),
            Err(GroupError::Fault(fault)) => Ok(self.fault(instance, &node.id, fault).await),
            Ok(terminal) => {
                let delta = terminal.diff_from(&input);
                self.apply_and_emit(instance, &node.id, &delta);
                self.advance_from(instance, &node.id).await
            }
        }
    }

    /// Apply a completed node's delta, bump the step counter, and emit the
    /// completion events the stream mode asks for.
    fn apply_and_emit(&self, instance: &mut WorkflowInstance, node_id: &str, delta: &StateDelta) {
        instance.record.apply(delta);
        instance.step += 1;
        self.emit_filtered(
            &instance.id,
            StreamEventKind::NodeCompleted {
                node_id: node_id.to_string(),
                step: instance.step,
                delta: delta.to_json(),
            },
        );
        self.emit_filtered(
            &instance.id,
            StreamEventKind::Values {
                node_id: node_id.to_string(),
                step: instance.step,
                record: instance.record.to_json(),
            },
        );
    }

    /// After a node completes: fan out its parallel group if it anchors one,
    /// otherwise follow its outgoing edges.
    async fn advance_from(
        &self,
        instance: &mut WorkflowInstance,
        node_id: &str,
    ) -> Result<StepReport, RuntimeError> {
        if let Some(group) = self.flow.graph.parallel_from(node_id) {
            return self.run_parallel(instance, node_id, &group.clone()).await;
        }
        match route_from(&self.flow.graph, node_id, &instance.record) {
            Ok(next) => {
                instance.status = InstanceStatus::Ready(next.clone());
                self.maybe_checkpoint(instance).await?;
                Ok(StepReport::Advanced {
                    node: node_id.to_string(),
                    next,
                })
            }
            Err(error) => Ok(self.fault(instance, node_id, error).await),
        }
    }

    async fn run_parallel(
        &self,
        instance: &mut WorkflowInstance,
        from: &str,
        group: &ParallelGroup,
    ) -> Result<StepReport, RuntimeError> {
        for branch in &group.branches {
            self.emit_filtered(
                &instance.id,
                StreamEventKind::NodeStarted {
                    node_id: branch.clone(),
                    step: instance.step,
                },
            );
        }

        let branch_emitters = group
            .branches
            .iter()
            .map(|branch| self.executor_emitter(branch))
            .collect();
        let reduced = run_group(
            Arc::clone(&self.flow.graph),
            group.clone(),
            instance.record.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.reducers),
            instance.id.clone(),
            instance.step,
            self.config.stream_mode,
            branch_emitters,
            self.cancel_handle_for(&instance.id),
        )
        .await;

        match reduced {
            Err(GroupError::Cancelled) => Ok(self.mark_cancelled(instance)),
            Err(GroupError::Fault(fault)) => Ok(self.fault(instance, from, fault).await),
            Ok(reduced) => {
                self.apply_and_emit(instance, from, &reduced);
                instance.status = InstanceStatus::Ready(group.reduce_to.clone());
                // Reduction always checkpoints, regardless of the interval.
                self.save_checkpoint(instance).await?;
                Ok(StepReport::ParallelReduced {
                    group_from: from.to_string(),
                    branches: group.branches.len(),
                    next: group.reduce_to.clone(),
                })
            }
        }
    }

    async fn fault(
        &self,
        instance: &mut WorkflowInstance,
        node_id: &str,
        fault: Fault,
    ) -> StepReport {
        warn!(
            instance_id = instance.id,
            node_id,
            kind = fault.kind.as_str(),
            error = fault.message,
            "instance faulted"
        );
        instance.status = InstanceStatus::Faulted {
            node: node_id.to_string(),
            fault: fault.clone(),
        };
        self.emit_lifecycle(
            &instance.id,
            StreamEventKind::Faulted {
                node_id: node_id.to_string(),
                kind: fault.kind.as_str().to_string(),
                error: fault.message.clone(),
            },
        );
        StepReport::Faulted {
            node: node_id.to_string(),
            fault,
        }
    }

    /// Settle the instance as cancelled; stepping an already-settled
    /// instance reports cancellation without touching it.
    fn mark_cancelled(&self, instance: &mut WorkflowInstance) -> StepReport {
        if !instance.status.is_settled() {
            instance.status = InstanceStatus::Cancelled;
            self.emit_lifecycle(&instance.id, StreamEventKind::Cancelled);
        }
        StepReport::Cancelled
    }

    fn cancel_handle_for(&self, instance_id: &str) -> CancelHandle {
        self.cancel_handles
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }

    fn status_from_cursor(&self, cursor: &Cursor) -> InstanceStatus {
        match cursor {
            Cursor::At(node) => InstanceStatus::Ready(node.clone()),
            Cursor::Suspended { node } => {
                let allowed_actions = match self.flow.graph.node(node) {
                    Some(NodeSpec::HumanIntegration(spec)) => spec.actions.clone(),
                    _ => Vec::new(),
                };
                InstanceStatus::Suspended {
                    node: node.clone(),
                    allowed_actions,
                }
            }
            Cursor::Done => InstanceStatus::Terminated,
        }
    }

    async fn save_checkpoint(&self, instance: &mut WorkflowInstance) -> Result<(), RuntimeError> {
        let cursor = match &instance.status {
            InstanceStatus::Ready(node) | InstanceStatus::Running(node) => {
                Cursor::At(node.clone())
            }
            InstanceStatus::Suspended { node, .. } => Cursor::Suspended { node: node.clone() },
            InstanceStatus::Faulted { .. }
            | InstanceStatus::Terminated
            | InstanceStatus::Cancelled => Cursor::Done,
        };
        let checkpoint = Checkpoint {
            instance_id: instance.id.clone(),
            cursor,
            record: instance.record.clone(),
            step: instance.step,
            sequence: instance.checkpoint_seq + 1,
            created_at: Utc::now(),
        };
        self.store.save(checkpoint).await?;
        instance.checkpoint_seq += 1;
        debug!(
            instance_id = instance.id,
            sequence = instance.checkpoint_seq,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn maybe_checkpoint(&self, instance: &mut WorkflowInstance) -> Result<(), RuntimeError> {
        if instance.step % self.config.checkpoint_interval == 0 {
            self.save_checkpoint(instance).await?;
        }
        Ok(())
    }

    /// Emitter for executor-streamed tokens/messages, wired only when the
    /// stream mode wants them and the node passes the subset filter.
    fn executor_emitter(&self, node_id: &str) -> Option<EventEmitter> {
        let wants = matches!(
            self.config.stream_mode,
            StreamMode::Tokens | StreamMode::Messages
        );
        (wants && self.config.streams_node(node_id)).then(|| self.bus.emitter())
    }

    /// Lifecycle events (suspension, resume, termination, cancellation,
    /// faults) always reach the stream regardless of mode or node filter.
    fn emit_lifecycle(&self, instance_id: &str, kind: StreamEventKind) {
        let _ = self.bus.emitter().emit(StreamEvent::now(instance_id, kind));
    }

    /// Node-bound events pass the mode and node-subset filters before
    /// entering the channel.
    fn emit_filtered(&self, instance_id: &str, kind: StreamEventKind) {
        let mode_allows = match (&self.config.stream_mode, &kind) {
            (StreamMode::Events, StreamEventKind::NodeStarted { .. })
            | (StreamMode::Events, StreamEventKind::NodeCompleted { .. })
            | (StreamMode::Values, StreamEventKind::Values { .. })
            | (StreamMode::Messages, StreamEventKind::Message { .. })
            | (StreamMode::Tokens, StreamEventKind::Token { .. }) => true,
            _ => false,
        };
        if !mode_allows {
            return;
        }
        let event = StreamEvent::now(instance_id, kind);
        if event
            .node_id()
            .is_none_or(|node_id| self.config.streams_node(node_id))
        {
            let _ = self.bus.emitter().emit(event);
        }
    }
}

/// Evaluate a node's outgoing edges in declaration order; the first whose
/// condition holds wins. A condition type error or an exhausted edge list is
/// a fault.
fn route_from(graph: &Graph, node_id: &str, record: &StateRecord) -> Result<NodeId, Fault> {
    let edges = graph.edges_from(node_id);
    for edge in edges {
        match edge.condition.matches(record) {
            Ok(true) => return Ok(edge.to.clone()),
            Ok(false) => {}
            Err(error) => return Err(Fault::condition(error.to_string())),
        }
    }
    Err(Fault::routing(format!(
        "no outgoing edge of `{node_id}` matched the current state"
    )))
}

/// How a parallel group or embedded graph run ended short of a result.
#[derive(Debug)]
enum GroupError {
    /// Cancellation was requested while work was in flight.
    Cancelled,
    Fault(Fault),
}

impl From<Fault> for GroupError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// Run one parallel group: spawn every branch against a clone of the record,
/// gather deltas per the wait policy, and reduce them to a single delta.
/// A cancellation arriving mid-flight aborts every remaining branch task and
/// skips the reducer.
#[allow(clippy::too_many_arguments)]
async fn run_group(
    graph: Arc<Graph>,
    group: ParallelGroup,
    record: StateRecord,
    executor: Arc<dyn NodeExecutor>,
    reducers: Arc<ReducerRegistry>,
    instance_id: String,
    step: u64,
    mode: StreamMode,
    branch_emitters: Vec<Option<EventEmitter>>,
    cancel: CancelHandle,
) -> Result<StateDelta, GroupError> {
    let mut join_set: JoinSet<(usize, Result<StateDelta, GroupError>)> = JoinSet::new();
    for (index, branch) in group.branches.iter().enumerate() {
        let Some(spec) = graph.node(branch).cloned() else {
            return Err(Fault::routing(format!(
                "parallel branch `{branch}` is missing from the graph"
            ))
            .into());
        };
        let record = record.clone();
        let executor = Arc::clone(&executor);
        let reducers = Arc::clone(&reducers);
        let instance_id = instance_id.clone();
        let emitter = branch_emitters.get(index).cloned().flatten();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let result = run_branch(
                spec, record, executor, reducers, instance_id, step, mode, emitter, cancel,
            )
            .await;
            (index, result)
        });
    }

    let deltas: Vec<StateDelta> = if group.wait_for_all {
        let mut slots: Vec<Option<StateDelta>> = vec![None; group.branches.len()];
        loop {
            let joined = tokio::select! {
                joined = join_set.join_next() => joined,
                () = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(GroupError::Cancelled);
                }
            };
            match joined {
                None => break,
                Some(Ok((index, Ok(delta)))) => slots[index] = Some(delta),
                Some(Ok((_, Err(error)))) => {
                    join_set.abort_all();
                    return Err(error);
                }
                Some(Err(join_error)) => {
                    join_set.abort_all();
                    return Err(Fault::executor(join_error.to_string()).into());
                }
            }
        }
        // Declared branch order, independent of completion order.
        slots.into_iter().flatten().collect()
    } else {
        let mut winner = None;
        loop {
            let joined = tokio::select! {
                joined = join_set.join_next() => joined,
                () = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(GroupError::Cancelled);
                }
            };
            match joined {
                None => break,
                Some(Ok((_, Ok(delta)))) => {
                    winner = Some(delta);
                    join_set.abort_all();
                    break;
                }
                Some(Ok((_, Err(error)))) => {
                    join_set.abort_all();
                    return Err(error);
                }
                Some(Err(join_error)) if join_error.is_cancelled() => {}
                Some(Err(join_error)) => {
                    join_set.abort_all();
                    return Err(Fault::executor(join_error.to_string()).into());
                }
            }
        }
        winner.into_iter().collect()
    };

    let Some(reducer) = reducers.get(&group.reducer) else {
        return Err(Fault::internal(format!(
            "reducer `{}` vanished from the registry",
            group.reducer
        ))
        .into());
    };
    Ok(reducer.reduce(deltas))
}

/// Execute one branch node to a delta: agents through the executor port,
/// subgraphs recursively. Human-integration branches are rejected at compile
/// time and cannot appear here.
#[allow(clippy::too_many_arguments)]
async fn run_branch(
    spec: NodeSpec,
    record: StateRecord,
    executor: Arc<dyn NodeExecutor>,
    reducers: Arc<ReducerRegistry>,
    instance_id: String,
    step: u64,
    mode: StreamMode,
    emitter: Option<EventEmitter>,
    cancel: CancelHandle,
) -> Result<StateDelta, GroupError> {
    match spec {
        NodeSpec::Agent(agent) => {
            let ctx = ExecutorContext::new(instance_id, agent.id.clone(), step, mode, emitter);
            executor
                .invoke(&agent, record, ctx)
                .await
                .map_err(|error| Fault::executor(error.to_string()).into())
        }
        NodeSpec::Subgraph(sub) => {
            let terminal = execute_graph(
                Arc::clone(&sub.graph),
                record.clone(),
                executor,
                reducers,
                instance_id,
                step,
                mode,
                emitter,
                cancel,
            )
            .await?;
            Ok(terminal.diff_from(&record))
        }
        NodeSpec::HumanIntegration(node) => Err(Fault::internal(format!(
            "human-integration node `{}` cannot run as a parallel branch",
            node.id
        ))
        .into()),
    }
}

/// Upper bound on node executions inside one subgraph invocation. A subgraph
/// runs to completion within a single parent step, so a runaway loop here
/// would hang the parent step.
const SUBGRAPH_STEP_LIMIT: usize = 10_000;

/// Run an embedded graph to its terminal marker and return the terminal
/// record. Human-integration suspension cannot cross a subgraph boundary:
/// a holding trigger inside a subgraph is an error; a non-holding one passes
/// through as usual.
#[allow(clippy::too_many_arguments)]
fn execute_graph(
    graph: Arc<Graph>,
    input: StateRecord,
    executor: Arc<dyn NodeExecutor>,
    reducers: Arc<ReducerRegistry>,
    instance_id: String,
    step: u64,
    mode: StreamMode,
    emitter: Option<EventEmitter>,
    cancel: CancelHandle,
) -> BoxFuture<'static, Result<StateRecord, GroupError>> {
    Box::pin(async move {
        let mut record = input;
        let mut cursor = NodeId::Named(graph.entry().to_string());
        let mut executed = 0usize;

        loop {
            let node_id = match cursor {
                NodeId::End => return Ok(record),
                NodeId::Named(node_id) => node_id,
            };
            if cancel.is_cancelled() {
                return Err(GroupError::Cancelled);
            }
            executed += 1;
            if executed > SUBGRAPH_STEP_LIMIT {
                return Err(Fault::internal(format!(
                    "subgraph `{}` exceeded {SUBGRAPH_STEP_LIMIT} node executions",
                    graph.name()
                ))
                .into());
            }

            let Some(spec) = graph.node(&node_id) else {
                return Err(Fault::routing(format!(
                    "node `{node_id}` is missing from subgraph `{}`",
                    graph.name()
                ))
                .into());
            };

            match spec {
                NodeSpec::Agent(agent) => {
                    let ctx = ExecutorContext::new(
                        instance_id.clone(),
                        agent.id.clone(),
                        step,
                        mode,
                        emitter.clone(),
                    );
                    let delta = executor
                        .invoke(agent, record.clone(), ctx)
                        .await
                        .map_err(|error| GroupError::from(Fault::executor(error.to_string())))?;
                    record.apply(&delta);
                }
                NodeSpec::Subgraph(sub) => {
                    let terminal = execute_graph(
                        Arc::clone(&sub.graph),
                        record.clone(),
                        Arc::clone(&executor),
                        Arc::clone(&reducers),
                        instance_id.clone(),
                        step,
                        mode,
                        emitter.clone(),
                        cancel.clone(),
                    )
                    .await?;
                    let delta = terminal.diff_from(&record);
                    record.apply(&delta);
                }
                NodeSpec::HumanIntegration(node) => {
                    let triggered = match &node.trigger {
                        None => true,
                        Some(predicate) => predicate.eval(&record).map_err(|error| {
                            GroupError::from(Fault::condition(error.to_string()))
                        })?,
                    };
                    if triggered {
                        return Err(Fault::suspension(format!(
                            "human-integration node `{}` triggered inside subgraph `{}`; suspension cannot cross a subgraph boundary",
                            node.id,
                            graph.name()
                        ))
                        .into());
                    }
                }
            }

            cursor = if let Some(group) = graph.parallel_from(&node_id) {
                let reduced = run_group(
                    Arc::clone(&graph),
                    group.clone(),
                    record.clone(),
                    Arc::clone(&executor),
                    Arc::clone(&reducers),
                    instance_id.clone(),
                    step,
                    mode,
                    vec![emitter.clone(); group.branches.len()],
                    cancel.clone(),
                )
                .await?;
                record.apply(&reduced);
                group.reduce_to.clone()
            } else {
                route_from(&graph, &node_id, &record)?
            };
        }
    })
}
