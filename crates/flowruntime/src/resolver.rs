//! Binding of `{{nodeId.variable}}` references to upstream outputs.

use crate::graph::WorkflowGraph;
use flowcore::{
    NodeDefinition, NodeId, NodeResult, NodeStatus, ResolutionError, Value, WorkflowNode,
};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([^.}\s]+)\.([^}\s]+)\s*\}\}").expect("reference pattern is valid")
    })
}

/// One `{{node.variable}}` occurrence inside a field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub node_id: NodeId,
    /// Output variable name, optionally followed by a dotted path into it
    pub variable: String,
    /// The token as written, braces included
    pub token: String,
}

impl Reference {
    fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            node_id: caps[1].to_string(),
            variable: caps[2].to_string(),
            token: caps[0].to_string(),
        }
    }

    /// Output variable name without any trailing path
    pub fn root_variable(&self) -> &str {
        self.variable.split('.').next().unwrap_or(&self.variable)
    }
}

/// All references found in a piece of text, in order of appearance
pub fn references(text: &str) -> Vec<Reference> {
    pattern()
        .captures_iter(text)
        .map(|caps| Reference::from_captures(&caps))
        .collect()
}

/// References anywhere inside a value, including nested arrays and objects
pub fn value_references(value: &Value) -> Vec<Reference> {
    match value {
        Value::String(s) => references(s),
        Value::Array(items) => items.iter().flat_map(value_references).collect(),
        Value::Object(map) => map.values().flat_map(value_references).collect(),
        _ => Vec::new(),
    }
}

pub fn has_references(value: &Value) -> bool {
    match value {
        Value::String(s) => pattern().is_match(s),
        Value::Array(items) => items.iter().any(has_references),
        Value::Object(map) => map.values().any(has_references),
        _ => false,
    }
}

/// Rewrites the node part of every reference through `ids`. References to
/// nodes outside the map are left untouched.
pub fn rewrite_references(value: &Value, ids: &HashMap<NodeId, NodeId>) -> Value {
    match value {
        Value::String(s) => Value::String(
            pattern()
                .replace_all(s, |caps: &Captures<'_>| match ids.get(&caps[1]) {
                    Some(new_id) => format!("{{{{{}.{}}}}}", new_id, &caps[2]),
                    None => caps[0].to_string(),
                })
                .into_owned(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| rewrite_references(v, ids)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), rewrite_references(v, ids)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Produces the concrete field values for one node.
///
/// A field that is exactly one reference receives the upstream value
/// itself; references embedded in longer text are interpolated through
/// their textual form. Declared fields are then coerced to their field
/// type, and absent fields fall back to their declared default.
pub fn resolve(
    node: &WorkflowNode,
    definition: &NodeDefinition,
    graph: &WorkflowGraph,
    results: &BTreeMap<NodeId, NodeResult>,
) -> Result<HashMap<String, Value>, ResolutionError> {
    let scope = Scope {
        node_id: &node.id,
        ancestors: graph.ancestors(&node.id),
        results,
    };

    let mut resolved = HashMap::new();
    for field in &definition.fields {
        if let Some(default) = &field.default_value {
            if !node.field_values.contains_key(&field.name) {
                resolved.insert(field.name.clone(), default.clone());
            }
        }
    }

    for (name, raw) in &node.field_values {
        let value = scope.substitute(raw)?;
        let value = match definition.field(name) {
            Some(field) if !value.is_null() => {
                field
                    .field_type
                    .coerce(value)
                    .map_err(|offending| ResolutionError::TypeMismatch {
                        field: name.clone(),
                        expected: field.field_type,
                        value: offending,
                    })?
            }
            _ => value,
        };
        resolved.insert(name.clone(), value);
    }

    Ok(resolved)
}

struct Scope<'a> {
    node_id: &'a NodeId,
    ancestors: HashSet<NodeId>,
    results: &'a BTreeMap<NodeId, NodeResult>,
}

impl Scope<'_> {
    fn substitute(&self, value: &Value) -> Result<Value, ResolutionError> {
        match value {
            Value::String(text) => self.substitute_text(text),
            Value::Array(items) => items
                .iter()
                .map(|v| self.substitute(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.substitute(v)?)))
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn substitute_text(&self, text: &str) -> Result<Value, ResolutionError> {
        let mut tokens = pattern().captures_iter(text).peekable();
        if tokens.peek().is_none() {
            return Ok(Value::String(text.to_string()));
        }

        if let Some(caps) = pattern().captures(text) {
            if caps[0].len() == text.len() {
                return self.lookup(&Reference::from_captures(&caps));
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in tokens {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            let value = self.lookup(&Reference::from_captures(&caps))?;
            out.push_str(&value.to_string());
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(Value::String(out))
    }

    fn lookup(&self, reference: &Reference) -> Result<Value, ResolutionError> {
        if !self.ancestors.contains(&reference.node_id) {
            return Err(ResolutionError::UnresolvedVariable {
                node_id: self.node_id.clone(),
                reference: reference.token.clone(),
            });
        }

        let upstream = self.results.get(&reference.node_id);
        let status = upstream.map(|r| r.status).unwrap_or(NodeStatus::Pending);
        let Some(upstream) = upstream.filter(|r| r.status == NodeStatus::Succeeded) else {
            return Err(ResolutionError::UpstreamNotReady {
                upstream: reference.node_id.clone(),
                status,
            });
        };

        let missing = || ResolutionError::MissingOutput {
            upstream: reference.node_id.clone(),
            variable: reference.variable.clone(),
        };

        if let Some(value) = upstream.output.get(&reference.variable) {
            return Ok(value.clone());
        }

        let mut path = reference.variable.split('.');
        let root = path.next().ok_or_else(missing)?;
        let mut current = upstream.output.get(root).cloned().ok_or_else(missing)?;
        for key in path {
            current = descend(&current, key).ok_or_else(missing)?;
        }
        Ok(current)
    }
}

fn descend(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        Value::Json(json) => {
            let next = match json {
                serde_json::Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                other => other.get(key),
            };
            next.cloned().map(Value::from_json)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_references_in_order() {
        let found = references("Dear {{ n1.name }}, your score is {{grade.score}}.");
        let pairs: Vec<_> = found
            .iter()
            .map(|r| (r.node_id.as_str(), r.variable.as_str()))
            .collect();
        assert_eq!(pairs, vec![("n1", "name"), ("grade", "score")]);
    }

    #[test]
    fn plain_braces_are_not_references() {
        assert!(references("{{novariable}} and {single}").is_empty());
        assert!(!has_references(&Value::String("no tokens".into())));
    }

    #[test]
    fn rewrite_maps_known_nodes_only() {
        let ids = HashMap::from([("old".to_string(), "new".to_string())]);
        let value = Value::String("{{old.text}} / {{other.text}}".into());
        assert_eq!(
            rewrite_references(&value, &ids),
            Value::String("{{new.text}} / {{other.text}}".into())
        );
    }

    #[test]
    fn padded_reference_interpolates_as_text() {
        let mut upstream = NodeResult::pending();
        upstream.status = NodeStatus::Succeeded;
        upstream.output.insert("score".into(), Value::from(72.0));
        let results = BTreeMap::from([("n1".to_string(), upstream)]);
        let node_id = "n2".to_string();
        let scope = Scope {
            node_id: &node_id,
            ancestors: HashSet::from(["n1".to_string()]),
            results: &results,
        };

        assert_eq!(scope.substitute_text("{{n1.score}}").unwrap(), Value::from(72.0));
        assert_eq!(
            scope.substitute_text("  {{n1.score}} ").unwrap(),
            Value::String("  72 ".into())
        );
    }

    #[test]
    fn root_variable_strips_path() {
        let r = &references("{{n1.student.name}}")[0];
        assert_eq!(r.root_variable(), "student");
    }
}
