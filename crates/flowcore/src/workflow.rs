use crate::{TriggerKind, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type TemplateId = Uuid;
/// Node ids are unique within their workflow only.
pub type NodeId = String;
pub type EdgeId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<Edge>,
    pub trigger: TriggerConfig,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, trigger: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            trigger,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connects an output handle of one node to an input handle of another.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_handle: impl Into<String>,
        target: impl Into<NodeId>,
        target_handle: impl Into<String>,
    ) -> EdgeId {
        let edge = Edge {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            source_handle: source_handle.into(),
            target: target.into(),
            target_handle: target_handle.into(),
        };
        let id = edge.id.clone();
        self.edges.push(edge);
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// A vertex in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNode {
    pub id: NodeId,
    pub node_type: String,
    pub name: Option<String>,
    #[serde(default)]
    pub field_values: HashMap<String, Value>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            field_values: HashMap::new(),
            retry_policy: None,
            timeout_ms: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field_values.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 2.0,
        });
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Directed link from an output handle to an input handle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
}

/// Retry policy for transient adapter failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::from_millis((self.delay_ms as f64 * factor).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// How a workflow gets started. Each kind carries its own configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerConfig {
    Manual,
    Schedule { cron: String },
    Webhook {
        #[serde(default = "webhook_token")]
        token: String,
    },
}

/// Shortest token accepted for webhook ingress
pub const MIN_WEBHOOK_TOKEN_LEN: usize = 16;

fn webhook_token() -> String {
    Uuid::new_v4().simple().to_string()
}

impl TriggerConfig {
    /// A webhook trigger with a fresh unguessable token
    pub fn webhook() -> Self {
        TriggerConfig::Webhook {
            token: webhook_token(),
        }
    }

    pub fn schedule(cron: impl Into<String>) -> Self {
        TriggerConfig::Schedule { cron: cron.into() }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerConfig::Manual => TriggerKind::Manual,
            TriggerConfig::Schedule { .. } => TriggerKind::Schedule,
            TriggerConfig::Webhook { .. } => TriggerKind::Webhook,
        }
    }
}

/// Reusable graph shape, decoupled from trigger and activation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<Edge>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn from_workflow(workflow: &Workflow, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: workflow.description.clone(),
            category: None,
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
            created_by: workflow.created_by.clone(),
            created_at: Utc::now(),
        }
    }
}
