//! Node type definitions: the typed schema every node kind declares.

use crate::Value;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry entry describing one node kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDefinition {
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub description: String,
    pub category: NodeCategory,
    pub fields: Vec<FieldDefinition>,
    pub inputs: Vec<HandleDefinition>,
    pub outputs: Vec<HandleDefinition>,
    #[serde(default)]
    pub output_variables: Vec<OutputVariable>,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>, label: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            node_type: node_type.into(),
            label: label.into(),
            description: String::new(),
            category,
            fields: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_variables: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_input(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.inputs.push(HandleDefinition::new(id, label));
        self
    }

    pub fn with_output(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.outputs.push(HandleDefinition::new(id, label));
        self
    }

    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.output_variables.push(OutputVariable {
            name: name.into(),
            label: label.into(),
            description: Some(description.into()),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_input(&self, handle: &str) -> bool {
        self.inputs.iter().any(|h| h.id == handle)
    }

    pub fn has_output(&self, handle: &str) -> bool {
        self.outputs.iter().any(|h| h.id == handle)
    }

    pub fn declares_variable(&self, name: &str) -> bool {
        self.output_variables.iter().any(|v| v.name == name)
    }
}

/// Closed set of node categories. The engine dispatches on this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "name", content = "kind")]
pub enum NodeCategory {
    Trigger(TriggerKind),
    Action,
    Logic(LogicKind),
    #[serde(rename = "AI")]
    Ai,
    Data,
}

impl NodeCategory {
    pub fn label(&self) -> &'static str {
        match self {
            NodeCategory::Trigger(_) => "Trigger",
            NodeCategory::Action => "Action",
            NodeCategory::Logic(_) => "Logic",
            NodeCategory::Ai => "AI",
            NodeCategory::Data => "Data",
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, NodeCategory::Trigger(_))
    }

    /// Categories whose adapter failures may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeCategory::Action | NodeCategory::Ai)
    }

    /// Sort key used when listing the catalog
    pub fn rank(&self) -> u8 {
        match self {
            NodeCategory::Trigger(_) => 0,
            NodeCategory::Action => 1,
            NodeCategory::Logic(_) => 2,
            NodeCategory::Data => 3,
            NodeCategory::Ai => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Webhook,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Webhook => "webhook",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogicKind {
    /// Routes execution down the `true` or `false` handle
    Condition,
    /// Waits, then continues down every handle
    Delay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandleDefinition {
    pub id: String,
    pub label: String,
}

impl HandleDefinition {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputVariable {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Data sources that can populate a select field at authoring time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DynamicOptionsSource {
    Classes,
    Exams,
    Students,
}

impl fmt::Display for DynamicOptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DynamicOptionsSource::Classes => "classes",
            DynamicOptionsSource::Exams => "exams",
            DynamicOptionsSource::Students => "students",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_options: Option<DynamicOptionsSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            required: false,
            options: Vec::new(),
            dynamic_options: None,
            default_value: None,
            placeholder: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options
            .iter()
            .map(|(label, value)| SelectOption::new(*label, *value))
            .collect();
        self
    }

    pub fn with_dynamic_options(mut self, source: DynamicOptionsSource) -> Self {
        self.dynamic_options = Some(source);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Static options constrain the value; dynamic ones degrade to free text.
    pub fn constrains_options(&self) -> bool {
        self.dynamic_options.is_none() && !self.options.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Select,
    Boolean,
    Textarea,
    Date,
    Json,
}

impl FieldType {
    /// Whether a literal value is acceptable for this field type.
    /// Strings that parse as the target type are accepted, as authoring
    /// surfaces tend to submit form input as text.
    pub fn accepts(&self, value: &Value) -> bool {
        self.coerce(value.clone()).is_ok()
    }

    /// Converts a value to this field type's canonical representation.
    /// On failure returns the offending value's textual form.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match self {
            FieldType::Text | FieldType::Textarea | FieldType::Select => match value {
                Value::String(_) => Ok(value),
                Value::Null => Ok(Value::String(String::new())),
                Value::Array(_) | Value::Object(_) | Value::Json(_) => Err(value.to_string()),
                other => Ok(Value::String(other.to_string())),
            },
            FieldType::Number => match value {
                Value::Number(_) => Ok(value),
                Value::String(ref s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| s.clone()),
                Value::Json(serde_json::Value::Number(ref n)) => {
                    n.as_f64().map(Value::Number).ok_or_else(|| n.to_string())
                }
                other => Err(other.to_string()),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value),
                Value::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "0" => Ok(Value::Bool(false)),
                    _ => Err(s.clone()),
                },
                Value::Json(serde_json::Value::Bool(b)) => Ok(Value::Bool(b)),
                other => Err(other.to_string()),
            },
            FieldType::Date => match value {
                Value::Date(_) => Ok(value),
                Value::String(ref s) => parse_date(s).map(Value::Date).ok_or_else(|| s.clone()),
                other => Err(other.to_string()),
            },
            FieldType::Json => match value {
                Value::String(s) => Ok(serde_json::from_str::<serde_json::Value>(&s)
                    .map(Value::from_json)
                    .unwrap_or(Value::String(s))),
                Value::Json(j) => Ok(Value::from_json(j)),
                other => Ok(other),
            },
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Select => "select",
            FieldType::Boolean => "boolean",
            FieldType::Textarea => "textarea",
            FieldType::Date => "date",
            FieldType::Json => "json",
        })
    }
}

/// RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_coerce_to_numbers() {
        assert_eq!(FieldType::Number.coerce("42".into()), Ok(Value::Number(42.0)));
        assert_eq!(FieldType::Number.coerce(" 3.5 ".into()), Ok(Value::Number(3.5)));
        assert!(FieldType::Number.coerce("forty".into()).is_err());
    }

    #[test]
    fn boolean_strings_coerce() {
        assert_eq!(FieldType::Boolean.coerce("TRUE".into()), Ok(Value::Bool(true)));
        assert_eq!(FieldType::Boolean.coerce("no".into()), Ok(Value::Bool(false)));
        assert!(FieldType::Boolean.coerce("maybe".into()).is_err());
    }

    #[test]
    fn dates_accept_rfc3339_and_plain_days() {
        let full = FieldType::Date.coerce("2024-09-01T08:30:00+07:00".into()).unwrap();
        assert_eq!(full.as_date().unwrap().to_rfc3339(), "2024-09-01T01:30:00+00:00");

        let day = FieldType::Date.coerce("2024-09-01".into()).unwrap();
        assert_eq!(day.as_date().unwrap().to_rfc3339(), "2024-09-01T00:00:00+00:00");

        assert!(FieldType::Date.coerce("next tuesday".into()).is_err());
    }

    #[test]
    fn json_fields_parse_strings_and_keep_structures() {
        let parsed = FieldType::Json.coerce(r#"{"a": 1}"#.into()).unwrap();
        assert!(matches!(parsed, Value::Object(_)));

        let array = Value::Array(vec![Value::Number(1.0)]);
        assert_eq!(FieldType::Json.coerce(array.clone()), Ok(array));

        assert_eq!(
            FieldType::Json.coerce("not json".into()),
            Ok(Value::String("not json".into()))
        );
    }

    #[test]
    fn text_rejects_structures() {
        assert_eq!(FieldType::Text.coerce(Value::Number(7.0)), Ok(Value::String("7".into())));
        assert!(FieldType::Text.accepts(&Value::String("hi".into())));
        assert!(!FieldType::Text.accepts(&Value::Array(vec![])));
    }

    #[test]
    fn category_serializes_as_tagged_variant() {
        let json = serde_json::to_value(NodeCategory::Trigger(TriggerKind::Webhook)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "Trigger", "kind": "webhook"}));
        let json = serde_json::to_value(NodeCategory::Ai).unwrap();
        assert_eq!(json, serde_json::json!({"name": "AI"}));
    }
}
