//! Core abstractions for the workflow engine
//!
//! This crate provides the data model (node definitions, workflows,
//! execution records, templates), the dynamic value type, the error
//! taxonomy, the adapter traits external capabilities implement, and the
//! execution event bus. It contains no scheduling logic.

mod definition;
mod error;
pub mod events;
mod execution;
mod node;
mod value;
mod workflow;

pub use definition::{
    DynamicOptionsSource, FieldDefinition, FieldType, HandleDefinition, LogicKind, NodeCategory,
    NodeDefinition, OutputVariable, SelectOption, TriggerKind,
};
pub use error::{
    AdapterError, DefinitionError, EngineError, FlowError, ResolutionError, StoreError,
    ValidationError,
};
pub use events::{EventBus, EventEmitter, ExecutionEvent, NodeEvent};
pub use execution::{ExecutionId, ExecutionRecord, ExecutionStatus, NodeResult, NodeStatus};
pub use node::{NodeAdapter, NodeContext, NodeMetadata, NodeOutput, OptionsProvider};
pub use value::Value;
pub use workflow::{
    Edge, EdgeId, NodeId, RetryPolicy, Template, TemplateId, TriggerConfig, Workflow,
    WorkflowId, WorkflowNode, MIN_WEBHOOK_TOKEN_LEN,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
