//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the node registry,
//! graph validation, variable resolution, DAG-based parallel execution,
//! trigger dispatch, cron scheduling, templates and the persistence
//! contract.

mod executor;
pub mod graph;
pub mod logic;
mod registry;
pub mod resolver;
mod retry;
mod runtime;
pub mod scheduler;
mod store;
mod template;
mod trigger;
mod validator;

pub use executor::{WorkflowExecutor, CANCELLED};
pub use graph::WorkflowGraph;
pub use registry::NodeRegistry;
pub use retry::{call_with_retry, AttemptError, Attempted};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use scheduler::Scheduler;
pub use store::{ExecutionStore, MemoryStore, TemplateStore, WorkflowStore};
pub use template::{TemplateMeta, TemplateOverrides, TemplateService};
pub use trigger::{trigger_output, TriggerRequest};
pub use validator::{validate, ValidationResult};
