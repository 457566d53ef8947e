#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    AdapterError, FieldDefinition, FieldType, LogicKind, NodeAdapter, NodeCategory, NodeContext,
    NodeDefinition, NodeOutput, RetryPolicy, TriggerKind, Value,
};
use flowruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MANUAL: &str = "manual";
pub const WEBHOOK: &str = "webhook";
pub const SCHEDULE: &str = "schedule";
pub const ACTION: &str = "action";
pub const CONDITION: &str = "condition";
pub const DELAY: &str = "delay";

pub fn definitions() -> Vec<NodeDefinition> {
    vec![
        NodeDefinition::new(MANUAL, "Manual", NodeCategory::Trigger(TriggerKind::Manual))
            .with_output("out", "Out")
            .with_variable("triggeredBy", "Triggered By", "Caller")
            .with_variable("triggeredAt", "Triggered At", "Start time"),
        NodeDefinition::new(WEBHOOK, "Webhook", NodeCategory::Trigger(TriggerKind::Webhook))
            .with_output("out", "Out")
            .with_variable("payload", "Payload", "Request body"),
        NodeDefinition::new(SCHEDULE, "Schedule", NodeCategory::Trigger(TriggerKind::Schedule))
            .with_output("out", "Out")
            .with_field(FieldDefinition::new("cron", "Cron", FieldType::Text))
            .with_variable("scheduledAt", "Scheduled At", "Tick"),
        NodeDefinition::new(ACTION, "Action", NodeCategory::Action)
            .with_input("in", "In")
            .with_input("in2", "Second In")
            .with_output("out", "Out")
            .with_field(FieldDefinition::new("message", "Message", FieldType::Text))
            .with_field(FieldDefinition::new("count", "Count", FieldType::Number))
            .with_variable("echo", "Echo", "The message field")
            .with_variable("name", "Name", "A name"),
        NodeDefinition::new(CONDITION, "Condition", NodeCategory::Logic(LogicKind::Condition))
            .with_input("in", "In")
            .with_output("true", "True")
            .with_output("false", "False")
            .with_field(FieldDefinition::new("variable", "Variable", FieldType::Text).required())
            .with_field(FieldDefinition::new("operator", "Operator", FieldType::Text).with_default("eq"))
            .with_field(FieldDefinition::new("value", "Value", FieldType::Text))
            .with_variable("result", "Result", "Outcome"),
        NodeDefinition::new(DELAY, "Delay", NodeCategory::Logic(LogicKind::Delay))
            .with_input("in", "In")
            .with_output("out", "Out")
            .with_field(FieldDefinition::new("duration", "Duration", FieldType::Number).with_default(1000.0))
            .with_variable("waitedMs", "Waited", "Pause"),
    ]
}

/// Adapter that replays a script of results, one per call. Once the script
/// runs out it echoes the `message` field.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<NodeOutput, AdapterError>>>,
    delay: Option<Duration>,
    pub calls: AtomicU32,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedAdapter {
    pub fn echo() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<Result<NodeOutput, AdapterError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::echo()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls observed running at the same time
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeAdapter for ScriptedAdapter {
    fn node_type(&self) -> &str {
        ACTION
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            return result;
        }

        if ctx.field_str("message") == Some("fail") {
            return Err(AdapterError::permanent("asked to fail"));
        }
        Ok(NodeOutput::new()
            .with_output("echo", ctx.get_field_or("message", Value::Null))
            .with_output("name", "Ada")
            .with_output("undeclared", "dropped"))
    }
}

pub fn registry_with(adapter: Arc<ScriptedAdapter>) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    for def in definitions() {
        registry.register(def).unwrap();
    }
    registry.register_adapter(adapter).unwrap();
    Arc::new(registry)
}

pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        node_timeout_ms: 1_000,
        retry: RetryPolicy {
            max_attempts: 3,
            delay_ms: 10,
            backoff_multiplier: 1.0,
        },
        ..RuntimeConfig::default()
    }
}

pub fn runtime_with(adapter: Arc<ScriptedAdapter>) -> FlowRuntime {
    FlowRuntime::new(registry_with(adapter), fast_config())
}
