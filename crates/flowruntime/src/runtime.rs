use crate::executor::WorkflowExecutor;
use crate::registry::NodeRegistry;
use crate::store::{ExecutionStore, MemoryStore, TemplateStore, WorkflowStore};
use crate::template::{TemplateMeta, TemplateOverrides, TemplateService};
use crate::trigger::TriggerRequest;
use crate::validator::{self, ValidationResult};
use chrono::Utc;
use flowcore::{
    EngineError, EventBus, ExecutionEvent, ExecutionId, ExecutionRecord, FlowError, RetryPolicy,
    StoreError, Template, TemplateId, TriggerConfig, ValidationError, Value, Workflow, WorkflowId,
    MIN_WEBHOOK_TOKEN_LEN,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Main runtime: validates and stores workflows, dispatches triggers and
/// tracks running executions. Cheap to clone.
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    templates: TemplateService,
    webhooks: Arc<RwLock<HashMap<String, WorkflowId>>>,
    running: Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a runtime over an in-memory store
    pub fn new(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(registry, config, store.clone(), store.clone(), store)
    }

    pub fn with_stores(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(&config));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let templates = TemplateService::new(registry.clone(), workflows.clone(), templates);

        Self {
            registry,
            executor,
            event_bus,
            workflows,
            executions,
            templates,
            webhooks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn validate(&self, workflow: &Workflow) -> ValidationResult {
        validator::validate(workflow, &self.registry)
    }

    /// Validates and stores a workflow, replacing any previous version.
    /// Returns the validation warnings.
    pub async fn register_workflow(
        &self,
        mut workflow: Workflow,
    ) -> Result<Vec<ValidationError>, FlowError> {
        let warnings = self.validate(&workflow).into_result()?;
        for warning in &warnings {
            tracing::warn!("Workflow {}: {}", workflow.id, warning);
        }

        workflow.updated_at = Utc::now();
        let id = workflow.id;
        let token = match &workflow.trigger {
            TriggerConfig::Webhook { token } => Some(token.clone()),
            _ => None,
        };

        // Held across the save so two registrations cannot claim one token
        let mut webhooks = self.webhooks.write().await;
        if let Some(token) = &token {
            if token.trim().len() < MIN_WEBHOOK_TOKEN_LEN {
                return Err(EngineError::WeakWebhookToken {
                    min: MIN_WEBHOOK_TOKEN_LEN,
                }
                .into());
            }
            if let Some(owner) = webhooks.get(token).filter(|owner| **owner != id) {
                return Err(EngineError::WebhookTokenTaken(*owner).into());
            }
        }

        self.workflows.save_workflow(workflow).await?;

        webhooks.retain(|_, wf| *wf != id);
        if let Some(token) = token {
            webhooks.insert(token, id);
        }

        tracing::info!("Registered workflow {}", id);
        Ok(warnings)
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .load_workflow(id)
            .await
            .map_err(|e| not_found(e, EngineError::WorkflowNotFound(id)))
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, FlowError> {
        Ok(self.workflows.list_workflows().await?)
    }

    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<(), FlowError> {
        self.workflows
            .delete_workflow(id)
            .await
            .map_err(|e| not_found(e, EngineError::WorkflowNotFound(id)))?;
        self.webhooks.write().await.retain(|_, wf| *wf != id);
        tracing::info!("Deleted workflow {}", id);
        Ok(())
    }

    /// Runs a workflow on behalf of a user and waits for the result
    pub async fn trigger_manual(
        &self,
        workflow_id: WorkflowId,
        triggered_by: impl Into<String>,
        context: HashMap<String, Value>,
    ) -> Result<ExecutionRecord, FlowError> {
        self.execute(TriggerRequest::manual(workflow_id, triggered_by, context))
            .await
    }

    pub async fn resolve_webhook(&self, token: &str) -> Result<WorkflowId, FlowError> {
        self.webhooks
            .read()
            .await
            .get(token)
            .copied()
            .ok_or_else(|| EngineError::WebhookNotFound.into())
    }

    /// Runs the workflow listening on `token` with the payload as context
    pub async fn trigger_webhook(
        &self,
        token: &str,
        payload: serde_json::Value,
    ) -> Result<ExecutionRecord, FlowError> {
        let workflow_id = self.resolve_webhook(token).await?;
        self.execute(TriggerRequest::webhook(workflow_id, payload))
            .await
    }

    /// Runs an execution to completion
    pub async fn execute(&self, request: TriggerRequest) -> Result<ExecutionRecord, FlowError> {
        let (workflow, record, token) = self.prepare(request).await?;
        Ok(self.drive(workflow, record, token).await)
    }

    /// Starts an execution in the background and returns its id. Rejections
    /// (inactive, invalid, unknown workflow) are still reported here.
    pub async fn submit(&self, request: TriggerRequest) -> Result<ExecutionId, FlowError> {
        let (workflow, record, token) = self.prepare(request).await?;
        let id = record.id;
        let runtime = self.clone();
        tokio::spawn(async move {
            runtime.drive(workflow, record, token).await;
        });
        Ok(id)
    }

    async fn prepare(
        &self,
        request: TriggerRequest,
    ) -> Result<(Workflow, ExecutionRecord, CancellationToken), FlowError> {
        let workflow = self.get_workflow(request.workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow.id).into());
        }
        self.validate(&workflow).into_result()?;

        let record = ExecutionRecord::new(
            workflow.id,
            request.triggered_by,
            request.kind,
            request.context,
            workflow.nodes.iter().map(|n| &n.id),
        );
        self.executions.save_execution(record.clone()).await?;

        let token = CancellationToken::new();
        self.running.write().await.insert(record.id, token.clone());
        Ok((workflow, record, token))
    }

    async fn drive(
        &self,
        workflow: Workflow,
        record: ExecutionRecord,
        token: CancellationToken,
    ) -> ExecutionRecord {
        let id = record.id;
        let record = self
            .executor
            .execute(
                &workflow,
                &self.registry,
                &self.event_bus,
                self.executions.as_ref(),
                record,
                token,
            )
            .await;

        self.running.write().await.remove(&id);
        if let Err(e) = self.executions.save_execution(record.clone()).await {
            tracing::error!("Failed to persist execution {}: {}", id, e);
        }
        record
    }

    /// Cancels a running execution. Cancelling a finished execution is a
    /// no-op.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        if let Some(token) = self.running.read().await.get(&execution_id) {
            tracing::info!("Cancelling execution {}", execution_id);
            token.cancel();
            return Ok(());
        }
        self.get_execution(execution_id).await.map(|_| ())
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<ExecutionRecord, FlowError> {
        self.executions
            .load_execution(id)
            .await
            .map_err(|e| not_found(e, EngineError::ExecutionNotFound(id)))
    }

    /// Executions of a workflow, most recent first
    pub async fn get_executions(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionRecord>, FlowError> {
        Ok(self.executions.list_executions(workflow_id).await?)
    }

    pub async fn save_as_template(
        &self,
        workflow_id: WorkflowId,
        meta: TemplateMeta,
    ) -> Result<Template, FlowError> {
        self.templates.save_as_template(workflow_id, meta).await
    }

    /// Instantiates a template and registers the resulting (inactive)
    /// workflow
    pub async fn use_template(
        &self,
        template_id: TemplateId,
        overrides: TemplateOverrides,
    ) -> Result<Workflow, FlowError> {
        let workflow = self.templates.instantiate(template_id, overrides).await?;
        self.register_workflow(workflow.clone()).await?;
        Ok(workflow)
    }
}

fn not_found(error: StoreError, engine: EngineError) -> FlowError {
    match error {
        StoreError::NotFound { .. } => engine.into(),
        other => other.into(),
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Default per-attempt limit for adapter calls
    pub node_timeout_ms: u64,
    /// Default retry policy for Action and AI nodes
    pub retry: RetryPolicy,
}

impl RuntimeConfig {
    /// Defaults overridden by `FLOW_*` environment variables. Unparseable
    /// values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_var("FLOW_MAX_PARALLEL_NODES") {
            config.max_parallel_nodes = v;
        }
        if let Some(v) = env_var("FLOW_EVENT_BUFFER") {
            config.event_buffer_size = v;
        }
        if let Some(v) = env_var("FLOW_NODE_TIMEOUT_MS") {
            config.node_timeout_ms = v;
        }
        if let Some(v) = env_var("FLOW_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = v;
        }
        if let Some(v) = env_var("FLOW_RETRY_DELAY_MS") {
            config.retry.delay_ms = v;
        }
        config
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            node_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}
