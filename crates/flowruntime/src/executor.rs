use crate::graph::WorkflowGraph;
use crate::logic;
use crate::registry::NodeRegistry;
use crate::resolver;
use crate::retry::{self, AttemptError};
use crate::store::ExecutionStore;
use crate::trigger::trigger_output;
use crate::RuntimeConfig;
use chrono::Utc;
use flowcore::{
    Edge, EngineError, EventBus, ExecutionEvent, ExecutionId, ExecutionRecord, ExecutionStatus,
    LogicKind, NodeAdapter, NodeCategory, NodeContext, NodeDefinition, NodeId, NodeStatus,
    RetryPolicy, Value, Workflow, WorkflowNode,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;

pub const CANCELLED: &str = "Cancelled";

/// Executes workflows as DAGs, running independent nodes in parallel
pub struct WorkflowExecutor {
    max_parallel: usize,
    node_timeout: Duration,
    retry: RetryPolicy,
}

impl WorkflowExecutor {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            max_parallel: config.max_parallel_nodes.max(1),
            node_timeout: Duration::from_millis(config.node_timeout_ms),
            retry: config.retry.clone(),
        }
    }

    /// Drives one execution to a terminal state.
    ///
    /// The returned record always has `finished_at` set and every node in
    /// `succeeded`, `failed` or `skipped`. The workflow is expected to have
    /// passed validation already.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        registry: &Arc<NodeRegistry>,
        event_bus: &Arc<EventBus>,
        store: &dyn ExecutionStore,
        mut record: ExecutionRecord,
        cancellation: CancellationToken,
    ) -> ExecutionRecord {
        let start_time = Instant::now();
        record.status = ExecutionStatus::Running;

        event_bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id: record.id,
            workflow_id: workflow.id,
            triggered_by: record.triggered_by.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting execution {} of workflow {} ({} nodes)",
            record.id,
            workflow.id,
            workflow.nodes.len()
        );

        let mut run = Run {
            executor: self,
            workflow,
            graph: WorkflowGraph::build(workflow),
            registry,
            event_bus,
            trigger_context: Arc::new(record.context.clone()),
            record,
            selections: HashMap::new(),
            tainted: HashSet::new(),
            running: FuturesUnordered::new(),
            aborts: HashMap::new(),
            cancellation,
            cancelled: false,
        };

        run.drive(store).await;
        let record = run.finish();

        let duration_ms = start_time.elapsed().as_millis() as u64;
        event_bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id: record.id,
            workflow_id: workflow.id,
            status: record.status,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Execution {} finished as {} in {}ms",
            record.id,
            record.status,
            duration_ms
        );

        record
    }
}

/// Outcome of a spawned node task
#[derive(Debug)]
enum TaskOutcome {
    Succeeded {
        outputs: HashMap<String, Value>,
        selected: Option<HashSet<String>>,
    },
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct TaskResult {
    outcome: TaskOutcome,
    attempts: u32,
    duration_ms: u64,
}

enum EdgeState {
    Waiting,
    Active,
    Pruned,
    Failed,
}

enum Readiness {
    Waiting,
    Run,
    /// `tainted` when an upstream failure caused the skip
    Skip { tainted: bool },
}

type Running = BoxFuture<'static, (NodeId, Result<TaskResult, JoinError>)>;

/// State of one execution. Only the driving loop writes `record`.
struct Run<'a> {
    executor: &'a WorkflowExecutor,
    workflow: &'a Workflow,
    graph: WorkflowGraph,
    registry: &'a Arc<NodeRegistry>,
    event_bus: &'a Arc<EventBus>,
    trigger_context: Arc<HashMap<String, Value>>,
    record: ExecutionRecord,
    /// Handles chosen by succeeded nodes; absent means all handles
    selections: HashMap<NodeId, HashSet<String>>,
    /// Skipped because of an upstream failure rather than branch pruning
    tainted: HashSet<NodeId>,
    running: FuturesUnordered<Running>,
    aborts: HashMap<NodeId, AbortHandle>,
    cancellation: CancellationToken,
    cancelled: bool,
}

impl Run<'_> {
    fn execution_id(&self) -> ExecutionId {
        self.record.id
    }

    async fn drive(&mut self, store: &dyn ExecutionStore) {
        loop {
            if self.cancellation.is_cancelled() {
                self.cancelled = true;
                break;
            }

            // Settle everything decidable without waiting
            while self.schedule_ready() {}

            if self.running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    self.cancelled = true;
                    break;
                }
                Some((node_id, joined)) = self.running.next() => {
                    self.aborts.remove(&node_id);
                    let result = joined.unwrap_or_else(|e| TaskResult {
                        outcome: TaskOutcome::Failed(format!("Task join error: {}", e)),
                        attempts: 1,
                        duration_ms: 0,
                    });
                    self.complete(&node_id, result);
                    if let Err(e) = store.save_execution(self.record.clone()).await {
                        tracing::warn!("Failed to checkpoint execution {}: {}", self.execution_id(), e);
                    }
                }
            }
        }

        if self.cancelled {
            self.abandon();
        }
    }

    /// One pass over pending nodes. Returns true when any node changed
    /// state without needing to wait.
    fn schedule_ready(&mut self) -> bool {
        let mut progressed = false;
        let workflow = self.workflow;

        for node in &workflow.nodes {
            if self.record.node_status(&node.id) != Some(NodeStatus::Pending) {
                continue;
            }

            match self.readiness(&node.id) {
                Readiness::Waiting => {}
                Readiness::Skip { tainted } => {
                    if tainted {
                        self.tainted.insert(node.id.clone());
                    }
                    self.skip(&node.id);
                    progressed = true;
                }
                Readiness::Run => {
                    if self.running.len() >= self.executor.max_parallel {
                        break;
                    }
                    self.launch(node);
                    progressed = true;
                }
            }
        }

        progressed
    }

    fn readiness(&self, node_id: &str) -> Readiness {
        let mut any_active = false;
        let mut any_failed = false;
        let mut any_incoming = false;

        for edge in self.workflow.incoming(node_id) {
            any_incoming = true;
            match self.edge_state(edge) {
                EdgeState::Waiting => return Readiness::Waiting,
                EdgeState::Active => any_active = true,
                EdgeState::Failed => any_failed = true,
                EdgeState::Pruned => {}
            }
        }

        if !any_incoming || (any_active && !any_failed) {
            Readiness::Run
        } else {
            Readiness::Skip {
                tainted: any_failed,
            }
        }
    }

    fn edge_state(&self, edge: &Edge) -> EdgeState {
        match self.record.node_status(&edge.source) {
            Some(NodeStatus::Succeeded) => match self.selections.get(&edge.source) {
                Some(handles) if !handles.contains(&edge.source_handle) => EdgeState::Pruned,
                _ => EdgeState::Active,
            },
            Some(NodeStatus::Failed) => EdgeState::Failed,
            Some(NodeStatus::Skipped) if self.tainted.contains(&edge.source) => EdgeState::Failed,
            Some(NodeStatus::Skipped) | None => EdgeState::Pruned,
            Some(NodeStatus::Pending | NodeStatus::Running) => EdgeState::Waiting,
        }
    }

    fn skip(&mut self, node_id: &str) {
        tracing::debug!("Skipping node {}", node_id);
        if let Some(result) = self.record.node_results.get_mut(node_id) {
            result.status = NodeStatus::Skipped;
            result.finished_at = Some(Utc::now());
        }
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: self.execution_id(),
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn launch(&mut self, node: &WorkflowNode) {
        let registry = self.registry;
        let definition = match registry.lookup(&node.node_type) {
            Ok(def) => def,
            Err(e) => return self.fail_now(&node.id, e.to_string()),
        };

        self.mark_running(node);

        match definition.category {
            NodeCategory::Trigger(_) => {
                let outputs = trigger_output(
                    self.record.trigger,
                    &self.record.triggered_by,
                    self.record.started_at,
                    &self.trigger_context,
                );
                self.succeed(&node.id, outputs, None, 1, 0);
            }
            NodeCategory::Logic(kind) => {
                let fields = match self.resolve(node, definition) {
                    Some(fields) => fields,
                    None => return,
                };
                let token = self.cancellation.child_token();
                let task = run_logic(kind, fields, token);
                self.spawn(&node.id, task);
            }
            category @ (NodeCategory::Action | NodeCategory::Ai | NodeCategory::Data) => {
                let Some(adapter) = registry.adapter(&node.node_type) else {
                    let error = EngineError::NoAdapter(node.node_type.clone());
                    return self.fail_now(&node.id, error.to_string());
                };
                let fields = match self.resolve(node, definition) {
                    Some(fields) => fields,
                    None => return,
                };

                let policy = if category.is_retryable() {
                    node.retry_policy
                        .clone()
                        .unwrap_or_else(|| self.executor.retry.clone())
                } else {
                    RetryPolicy::none()
                };
                let limit = node
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.executor.node_timeout);

                let ctx = NodeContext {
                    execution_id: self.execution_id(),
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    fields,
                    trigger_context: self.trigger_context.clone(),
                    triggered_by: self.record.triggered_by.clone(),
                    attempt: 1,
                    events: self
                        .event_bus
                        .create_emitter(self.execution_id(), node.id.clone()),
                    cancellation: self.cancellation.child_token(),
                };
                let task = run_adapter(adapter, ctx, policy, limit, self.event_bus.clone());
                self.spawn(&node.id, task);
            }
        }
    }

    fn resolve(
        &mut self,
        node: &WorkflowNode,
        definition: &NodeDefinition,
    ) -> Option<HashMap<String, Value>> {
        match resolver::resolve(node, definition, &self.graph, &self.record.node_results) {
            Ok(fields) => Some(fields),
            Err(e) => {
                self.fail_now(&node.id, e.to_string());
                None
            }
        }
    }

    fn spawn(
        &mut self,
        node_id: &NodeId,
        task: impl std::future::Future<Output = TaskResult> + Send + 'static,
    ) {
        let handle = tokio::spawn(task);
        self.aborts.insert(node_id.clone(), handle.abort_handle());
        let node_id = node_id.clone();
        self.running
            .push(async move { (node_id, handle.await) }.boxed());
    }

    fn mark_running(&mut self, node: &WorkflowNode) {
        tracing::debug!("Starting node {} ({})", node.id, node.node_type);
        if let Some(result) = self.record.node_results.get_mut(&node.id) {
            result.status = NodeStatus::Running;
            result.started_at = Some(Utc::now());
        }
        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            attempt: 1,
            timestamp: Utc::now(),
        });
    }

    fn complete(&mut self, node_id: &str, result: TaskResult) {
        match result.outcome {
            TaskOutcome::Succeeded { mut outputs, selected } => {
                if let Some(def) = self
                    .workflow
                    .find_node(node_id)
                    .and_then(|n| self.registry.lookup(&n.node_type).ok())
                {
                    outputs.retain(|name, _| def.declares_variable(name));
                }
                self.succeed(node_id, outputs, selected, result.attempts, result.duration_ms);
            }
            TaskOutcome::Failed(error) => self.fail(node_id, error, result.attempts),
            TaskOutcome::Cancelled => self.fail(node_id, CANCELLED.to_string(), result.attempts),
        }
    }

    fn succeed(
        &mut self,
        node_id: &str,
        outputs: HashMap<String, Value>,
        selected: Option<HashSet<String>>,
        attempts: u32,
        duration_ms: u64,
    ) {
        tracing::info!("Node {} completed in {}ms", node_id, duration_ms);
        self.event_bus.emit(ExecutionEvent::NodeSucceeded {
            execution_id: self.execution_id(),
            node_id: node_id.to_string(),
            outputs: outputs.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });

        if let Some(handles) = selected {
            self.selections.insert(node_id.to_string(), handles);
        }
        if let Some(result) = self.record.node_results.get_mut(node_id) {
            result.status = NodeStatus::Succeeded;
            result.output = outputs;
            result.error = None;
            result.attempts = attempts;
            result.finished_at = Some(Utc::now());
        }
    }

    fn fail(&mut self, node_id: &str, error: String, attempts: u32) {
        tracing::error!("Node {} failed: {}", node_id, error);
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id(),
            node_id: node_id.to_string(),
            error: error.clone(),
            timestamp: Utc::now(),
        });

        if let Some(result) = self.record.node_results.get_mut(node_id) {
            result.status = NodeStatus::Failed;
            result.error = Some(error);
            result.attempts = attempts;
            result.finished_at = Some(Utc::now());
        }
    }

    /// Failure detected before anything was dispatched
    fn fail_now(&mut self, node_id: &str, error: String) {
        if let Some(result) = self.record.node_results.get_mut(node_id) {
            result.started_at.get_or_insert_with(Utc::now);
        }
        self.fail(node_id, error, 0);
    }

    /// In-flight nodes are abandoned as failed, everything still pending is
    /// skipped. Effects already dispatched are not undone.
    fn abandon(&mut self) {
        tracing::warn!("Execution {} cancelled", self.execution_id());
        for (_, handle) in self.aborts.drain() {
            handle.abort();
        }
        self.running = FuturesUnordered::new();

        let nodes: Vec<(NodeId, NodeStatus)> = self
            .record
            .node_results
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect();
        for (node_id, status) in nodes {
            match status {
                NodeStatus::Running => {
                    let attempts = self.record.node(&node_id).map(|r| r.attempts.max(1)).unwrap_or(1);
                    self.fail(&node_id, CANCELLED.to_string(), attempts);
                }
                NodeStatus::Pending => self.skip(&node_id),
                _ => {}
            }
        }
    }

    fn finish(mut self) -> ExecutionRecord {
        // Anything left undecided had no path to run
        let stranded: Vec<NodeId> = self
            .record
            .node_results
            .iter()
            .filter(|(_, r)| !r.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in stranded {
            self.skip(&node_id);
        }

        let status = self.terminal_status();
        self.record.error = match status {
            _ if self.cancelled => Some(CANCELLED.to_string()),
            ExecutionStatus::Failed => Some(format!(
                "{} node(s) failed and no branch completed",
                self.record.count(NodeStatus::Failed)
            )),
            _ => None,
        };
        self.record.status = status;
        self.record.finished_at = Some(Utc::now());
        self.record
    }

    fn terminal_status(&self) -> ExecutionStatus {
        if self.cancelled {
            return ExecutionStatus::Failed;
        }
        if self.record.count(NodeStatus::Failed) == 0 {
            return ExecutionStatus::Succeeded;
        }

        let mut trigger_failed = false;
        let mut completed_branch = false;
        for node in &self.workflow.nodes {
            let is_trigger = self
                .registry
                .lookup(&node.node_type)
                .is_ok_and(|d| d.category.is_trigger());
            match (self.record.node_status(&node.id), is_trigger) {
                (Some(NodeStatus::Failed), true) => trigger_failed = true,
                (Some(NodeStatus::Succeeded), false) => {
                    let continued = self
                        .workflow
                        .outgoing(&node.id)
                        .any(|e| matches!(self.edge_state(e), EdgeState::Active));
                    if !continued {
                        completed_branch = true;
                    }
                }
                _ => {}
            }
        }

        if !trigger_failed && completed_branch {
            ExecutionStatus::PartiallyFailed
        } else {
            ExecutionStatus::Failed
        }
    }
}

async fn run_logic(kind: LogicKind, fields: HashMap<String, Value>, token: CancellationToken) -> TaskResult {
    let started = Instant::now();
    let outcome = match logic::evaluate(kind, &fields, &token).await {
        Ok(outcome) => TaskOutcome::Succeeded {
            outputs: outcome.output.outputs,
            selected: outcome.selected,
        },
        Err(_) if token.is_cancelled() => TaskOutcome::Cancelled,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    };
    TaskResult {
        outcome,
        attempts: 1,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn run_adapter(
    adapter: Arc<dyn NodeAdapter>,
    ctx: NodeContext,
    policy: RetryPolicy,
    limit: Duration,
    event_bus: Arc<EventBus>,
) -> TaskResult {
    let execution_id = ctx.execution_id;
    let node_id = ctx.node_id.clone();
    let token = ctx.cancellation.clone();

    let attempted = retry::call_with_retry(
        &policy,
        limit,
        &token,
        |attempt, delay, error| {
            event_bus.emit(ExecutionEvent::NodeRetrying {
                execution_id,
                node_id: node_id.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        },
        |attempt| {
            let adapter = adapter.clone();
            let mut ctx = ctx.clone();
            ctx.attempt = attempt;
            async move { adapter.execute(ctx).await }
        },
    )
    .await;

    let outcome = match attempted.result {
        Ok(output) => TaskOutcome::Succeeded {
            outputs: output.outputs,
            selected: None,
        },
        Err(AttemptError::Cancelled) => TaskOutcome::Cancelled,
        Err(AttemptError::Adapter(e)) => TaskOutcome::Failed(match &e.details {
            Some(details) => format!("{} ({})", e, details),
            None => e.to_string(),
        }),
    };

    TaskResult {
        outcome,
        attempts: attempted.attempts,
        duration_ms: attempted.duration.as_millis() as u64,
    }
}
