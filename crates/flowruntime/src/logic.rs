//! Built-in evaluation of Logic nodes. These never reach an adapter.

use flowcore::{AdapterError, LogicKind, NodeOutput, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Output handles a condition node routes to
pub const TRUE_HANDLE: &str = "true";
pub const FALSE_HANDLE: &str = "false";

/// Default wait for a delay node without a `duration`
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// A finished logic node: its outputs, and the handles execution continues
/// through (`None` means every handle).
#[derive(Debug, Clone)]
pub struct LogicOutcome {
    pub output: NodeOutput,
    pub selected: Option<HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim() {
            "eq" | "==" => Operator::Eq,
            "neq" | "!=" => Operator::Neq,
            "contains" => Operator::Contains,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            _ => return None,
        })
    }

    /// Options offered by the condition node's operator field
    pub fn options() -> &'static [(&'static str, &'static str)] {
        &[
            ("Equals", "eq"),
            ("Not Equals", "neq"),
            ("Contains", "contains"),
            ("Greater Than", "gt"),
            ("Greater Or Equal", "gte"),
            ("Less Than", "lt"),
            ("Less Or Equal", "lte"),
        ]
    }
}

pub async fn evaluate(
    kind: LogicKind,
    fields: &HashMap<String, Value>,
    cancellation: &CancellationToken,
) -> Result<LogicOutcome, AdapterError> {
    match kind {
        LogicKind::Condition => {
            let result = condition(fields)?;
            let handle = if result { TRUE_HANDLE } else { FALSE_HANDLE };
            Ok(LogicOutcome {
                output: NodeOutput::new().with_output("result", result),
                selected: Some(HashSet::from([handle.to_string()])),
            })
        }
        LogicKind::Delay => {
            let ms = fields
                .get("duration")
                .and_then(Value::as_f64)
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| ms as u64)
                .unwrap_or(DEFAULT_DELAY_MS);

            tokio::select! {
                _ = cancellation.cancelled() => Err(AdapterError::permanent("Cancelled")),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(LogicOutcome {
                    output: NodeOutput::new().with_output("waitedMs", ms as i64),
                    selected: None,
                }),
            }
        }
    }
}

/// Evaluates `variable operator value`.
///
/// Both sides compare as numbers when both are numeric, as dates when both
/// parse as dates, and as text otherwise. `contains` tests membership for
/// arrays and substring otherwise.
pub fn condition(fields: &HashMap<String, Value>) -> Result<bool, AdapterError> {
    let left = fields.get("variable").cloned().unwrap_or(Value::Null);
    let right = fields.get("value").cloned().unwrap_or(Value::Null);
    let operator = fields
        .get("operator")
        .and_then(Value::as_str)
        .unwrap_or("eq");
    let operator = Operator::parse(operator)
        .ok_or_else(|| AdapterError::permanent(format!("Unknown operator '{}'", operator)))?;

    Ok(match operator {
        Operator::Eq => compare(&left, &right) == Some(Ordering::Equal),
        Operator::Neq => compare(&left, &right) != Some(Ordering::Equal),
        Operator::Contains => contains(&left, &right),
        Operator::Gt => compare(&left, &right) == Some(Ordering::Greater),
        Operator::Gte => matches!(compare(&left, &right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare(&left, &right) == Some(Ordering::Less),
        Operator::Lte => matches!(compare(&left, &right), Some(Ordering::Less | Ordering::Equal)),
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        Value::Json(serde_json::Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (number(left), number(right)) {
        return a.partial_cmp(&b);
    }
    let date = |v: &Value| flowcore::FieldType::Date.coerce(v.clone()).ok().and_then(|d| d.as_date());
    if let (Some(a), Some(b)) = (date(left), date(right)) {
        return Some(a.cmp(&b));
    }
    Some(left.to_string().cmp(&right.to_string()))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items
            .iter()
            .any(|item| compare(item, needle) == Some(Ordering::Equal)),
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .any(|item| compare(&Value::from_json(item.clone()), needle) == Some(Ordering::Equal)),
        other => other.to_string().contains(&needle.to_string()),
    }
}
