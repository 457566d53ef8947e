use crate::{ExecutionId, FieldType, NodeId, NodeStatus, TemplateId, TriggerKind, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registry misuse. Fatal at startup or while authoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Node type already registered: {0}")]
    DuplicateType(String),

    #[error("Unknown node type: {0}")]
    UnknownType(String),

    #[error("Options for field '{field}' are unavailable: {reason}")]
    DynamicOptionsUnavailable { field: String, reason: String },
}

/// Structural or semantic problems in a workflow graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Node '{node_id}' has unknown type '{node_type}'")]
    UnknownType { node_id: NodeId, node_type: String },

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(NodeId),

    #[error("Duplicate edge id '{0}'")]
    DuplicateEdgeId(String),

    #[error("Field '{field}' on node '{node_id}' expects {expected}, got {actual}")]
    BadFieldType {
        node_id: NodeId,
        field: String,
        expected: FieldType,
        actual: String,
    },

    #[error("Required field '{field}' on node '{node_id}' is empty")]
    MissingRequiredField { node_id: NodeId, field: String },

    #[error("Field '{field}' on node '{node_id}' is not declared by its node type")]
    UnknownField { node_id: NodeId, field: String },

    #[error("Workflow has no trigger node")]
    MissingTrigger,

    #[error("Workflow has more than one trigger node: {0:?}")]
    MultipleTriggers(Vec<NodeId>),

    #[error("Trigger node '{0}' has incoming edges")]
    TriggerHasIncomingEdge(NodeId),

    #[error("Trigger node is a {node} trigger but the workflow is configured for {configured}")]
    TriggerMismatch {
        node: TriggerKind,
        configured: TriggerKind,
    },

    #[error("Node '{0}' has no incoming edge")]
    MissingIncomingEdge(NodeId),

    #[error("Edge '{edge_id}' is dangling: {reason}")]
    DanglingEdge { edge_id: String, reason: String },

    #[error("Input handle '{handle}' on node '{node_id}' already has an incoming edge")]
    TargetHandleOccupied { node_id: NodeId, handle: String },

    #[error("Cycle detected at node '{0}'")]
    CycleDetected(NodeId),

    #[error("Node '{0}' is not reachable from the trigger")]
    Unreachable(NodeId),

    #[error("Node '{node_id}' references '{reference}' which is not an upstream output")]
    UnresolvedVariable { node_id: NodeId, reference: String },
}

/// Failures while binding upstream outputs into a node's fields.
/// These abort the affected node only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Reference '{reference}' in node '{node_id}' does not point at an ancestor")]
    UnresolvedVariable { node_id: NodeId, reference: String },

    #[error("Upstream node '{upstream}' is {status}, not succeeded")]
    UpstreamNotReady { upstream: NodeId, status: NodeStatus },

    #[error("Upstream node '{upstream}' produced no value for '{variable}'")]
    MissingOutput { upstream: NodeId, variable: String },

    #[error("Field '{field}' expects {expected}, could not convert '{value}'")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        value: String,
    },
}

/// Error raised by a node adapter. The adapter decides whether the
/// failure is worth retrying.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
    pub transient: bool,
    pub details: Option<serde_json::Value>,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            details: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            details: None,
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::transient(format!("Timed out after {}ms", timeout_ms))
    }

    pub fn missing_field(name: &str) -> Self {
        Self::permanent(format!("Missing required field: {}", name))
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Workflow {0} is inactive")]
    WorkflowInactive(WorkflowId),

    #[error("Cancelled")]
    Cancelled,

    #[error("Template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("No adapter registered for node type '{0}'")]
    NoAdapter(String),

    #[error("No workflow is listening on this webhook")]
    WebhookNotFound,

    #[error("Webhook token is already in use by workflow {0}")]
    WebhookTokenTaken(WorkflowId),

    #[error("Webhook token must be at least {min} characters")]
    WeakWebhookToken { min: usize },

    #[error("Workflow {workflow_id} is invalid: {}", join_errors(.errors))]
    InvalidWorkflow {
        workflow_id: WorkflowId,
        errors: Vec<ValidationError>,
    },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Execution error: {0}")]
    Execution(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Execution {0} is finished and can no longer be modified")]
    Immutable(ExecutionId),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
