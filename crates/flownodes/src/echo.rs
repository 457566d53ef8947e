use async_trait::async_trait;
use chrono::{Duration, Utc};
use flowcore::{
    AdapterError, DynamicOptionsSource, NodeAdapter, NodeContext, NodeDefinition, NodeOutput,
    OptionsProvider, SelectOption, Value,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::catalog;

/// Stand-in for a classroom service. Logs the resolved fields and answers
/// with plausible values for every variable the node declares, so a
/// workflow can be exercised end to end without the real backends.
pub struct EchoAdapter {
    definition: NodeDefinition,
}

impl EchoAdapter {
    pub fn new(definition: NodeDefinition) -> Self {
        Self { definition }
    }

    fn value_for(&self, variable: &str, ctx: &NodeContext) -> Value {
        if let Some(value) = ctx.fields.get(variable).filter(|v| !v.is_null()) {
            return value.clone();
        }

        match (self.definition.node_type.as_str(), variable) {
            (catalog::SEND_EMAIL, "sentTo") => ctx.get_field_or("to", Value::Null),
            (catalog::UPDATE_STUDENT, "updatedField") => ctx.get_field_or("field", Value::Null),
            (catalog::CREATE_ATTENDANCE_SESSION, "sessionCode") => {
                Value::String(session_code(&ctx.node_id, ctx.attempt))
            }
            (catalog::CREATE_ATTENDANCE_SESSION, "expiryTime") => {
                let minutes = ctx
                    .fields
                    .get("timeout")
                    .and_then(Value::as_f64)
                    .unwrap_or(5.0);
                Value::Date(Utc::now() + Duration::seconds((minutes * 60.0) as i64))
            }
            (_, "students") | (_, "classes") | (_, "examResults") => Value::Array(Vec::new()),
            (_, "sent") => Value::Bool(true),
            (_, name) if name.ends_with("Count") || name.ends_with("Score") => Value::Number(0.0),
            (_, name) if name.ends_with("Url") => {
                Value::String(format!("/{}/{}", self.definition.node_type, Uuid::new_v4()))
            }
            (_, name) if name.ends_with("Id") => Value::String(Uuid::new_v4().to_string()),
            _ => Value::Null,
        }
    }
}

/// Short numeric code derived from the node id, stable across attempts
fn session_code(node_id: &str, attempt: u32) -> String {
    let seed = node_id
        .bytes()
        .fold(attempt as u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    format!("{:06}", seed % 1_000_000)
}

#[async_trait]
impl NodeAdapter for EchoAdapter {
    fn node_type(&self) -> &str {
        &self.definition.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError> {
        ctx.events
            .info(format!("{}: {}", self.definition.label, ctx.node_id));

        let mut fields: Vec<_> = ctx.fields.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in fields {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        let mut output = NodeOutput::new();
        for variable in &self.definition.output_variables {
            let value = self.value_for(&variable.name, &ctx);
            output = output.with_output(variable.name.clone(), value);
        }
        Ok(output)
    }
}

/// Serves a fixed option list for one dynamic source
pub struct StaticOptionsProvider {
    source: DynamicOptionsSource,
    options: Vec<SelectOption>,
}

impl StaticOptionsProvider {
    pub fn new(source: DynamicOptionsSource, options: Vec<SelectOption>) -> Self {
        Self { source, options }
    }
}

#[async_trait]
impl OptionsProvider for StaticOptionsProvider {
    fn source(&self) -> DynamicOptionsSource {
        self.source
    }

    async fn options(
        &self,
        _context: &HashMap<String, Value>,
    ) -> Result<Vec<SelectOption>, AdapterError> {
        Ok(self.options.clone())
    }
}
