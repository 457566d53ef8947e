use crate::{
    events::EventEmitter, AdapterError, DynamicOptionsSource, ExecutionId, NodeId, SelectOption,
    Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// External capability bound to one node type (send an email, call the
/// AI service, query students, ...)
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    /// Node type this adapter serves (e.g., "send-email", "ai-generate")
    fn node_type(&self) -> &str;

    /// Perform the node's effect with fully resolved fields
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError>;
}

/// Lists the current values for a dynamic select field
#[async_trait]
pub trait OptionsProvider: Send + Sync {
    fn source(&self) -> DynamicOptionsSource;

    async fn options(
        &self,
        context: &HashMap<String, Value>,
    ) -> Result<Vec<SelectOption>, AdapterError>;
}

/// Execution context passed to each adapter invocation
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,

    pub node_id: NodeId,

    pub node_type: String,

    /// Field values with every `{{node.variable}}` reference substituted
    pub fields: HashMap<String, Value>,

    /// Payload the execution was triggered with
    pub trigger_context: Arc<HashMap<String, Value>>,

    pub triggered_by: String,

    /// 1-based attempt number
    pub attempt: u32,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Tripped when the execution is cancelled
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required field or return a permanent error
    pub fn require_field(&self, name: &str) -> Result<&Value, AdapterError> {
        self.fields
            .get(name)
            .filter(|v| !v.is_blank())
            .ok_or_else(|| AdapterError::missing_field(name))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, AdapterError> {
        self.require_field(name)?.as_str().ok_or_else(|| {
            AdapterError::permanent(format!("Field '{}' must be text", name))
        })
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Get field with default
    pub fn get_field_or(&self, name: &str, default: Value) -> Value {
        self.fields
            .get(name)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(default)
    }
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output variable values
    pub outputs: HashMap<String, Value>,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: HashMap<String, Value>,
}
