use chrono::{DateTime, Utc};
use flowcore::{TriggerKind, Value, WorkflowId};
use std::collections::HashMap;

pub const WEBHOOK_CALLER: &str = "webhook";
pub const SCHEDULER_CALLER: &str = "scheduler";

/// What every trigger kind hands to the engine
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub workflow_id: WorkflowId,
    pub triggered_by: String,
    pub kind: TriggerKind,
    pub context: HashMap<String, Value>,
}

impl TriggerRequest {
    /// A user-initiated run. `triggered_by` is the caller's identity.
    pub fn manual(
        workflow_id: WorkflowId,
        triggered_by: impl Into<String>,
        context: HashMap<String, Value>,
    ) -> Self {
        Self {
            workflow_id,
            triggered_by: triggered_by.into(),
            kind: TriggerKind::Manual,
            context,
        }
    }

    /// An inbound call; the JSON body becomes the execution context
    pub fn webhook(workflow_id: WorkflowId, payload: serde_json::Value) -> Self {
        Self {
            workflow_id,
            triggered_by: WEBHOOK_CALLER.to_string(),
            kind: TriggerKind::Webhook,
            context: Value::map_from_json(payload),
        }
    }

    /// A due cron tick
    pub fn schedule(workflow_id: WorkflowId, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            triggered_by: SCHEDULER_CALLER.to_string(),
            kind: TriggerKind::Schedule,
            context: HashMap::from([("scheduledAt".to_string(), Value::Date(scheduled_at))]),
        }
    }
}

/// Output of the built-in trigger node: the payload plus who fired it and
/// when. Webhooks also expose the raw body as `payload`.
pub fn trigger_output(
    kind: TriggerKind,
    triggered_by: &str,
    triggered_at: DateTime<Utc>,
    context: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut output = context.clone();
    output.insert("triggeredBy".to_string(), Value::String(triggered_by.to_string()));
    output.insert("triggeredAt".to_string(), Value::Date(triggered_at));

    match kind {
        TriggerKind::Webhook => {
            output
                .entry("payload".to_string())
                .or_insert_with(|| Value::Object(context.clone()));
        }
        TriggerKind::Schedule => {
            output
                .entry("scheduledAt".to_string())
                .or_insert(Value::Date(triggered_at));
        }
        TriggerKind::Manual => {}
    }
    output
}
