use crate::{NodeId, TriggerKind, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::PartiallyFailed
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::PartiallyFailed => "partially-failed",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        })
    }
}

/// Outcome of a single node within one execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResult {
    pub status: NodeStatus,
    pub output: HashMap<String, Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            output: HashMap::new(),
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Durable audit trail of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub triggered_by: String,
    pub trigger: TriggerKind,
    pub context: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub node_results: BTreeMap<NodeId, NodeResult>,
}

impl ExecutionRecord {
    /// Creates a pending record with one pending entry per node.
    pub fn new<'a>(
        workflow_id: WorkflowId,
        triggered_by: impl Into<String>,
        trigger: TriggerKind,
        context: HashMap<String, Value>,
        node_ids: impl IntoIterator<Item = &'a NodeId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            triggered_by: triggered_by.into(),
            trigger,
            context,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            node_results: node_ids
                .into_iter()
                .map(|id| (id.clone(), NodeResult::pending()))
                .collect(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_results.get(node_id).map(|r| r.status)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.node_results
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}
