use crate::graph::WorkflowGraph;
use crate::registry::NodeRegistry;
use crate::resolver;
use flowcore::{
    EngineError, FieldDefinition, NodeCategory, NodeDefinition, NodeId, ValidationError, Value,
    Workflow, WorkflowId, WorkflowNode,
};
use std::collections::{HashMap, HashSet};

/// Outcome of validating a workflow. Warnings never block execution.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub workflow_id: WorkflowId,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Warnings when valid, otherwise an `InvalidWorkflow` error
    pub fn into_result(self) -> Result<Vec<ValidationError>, EngineError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(EngineError::InvalidWorkflow {
                workflow_id: self.workflow_id,
                errors: self.errors,
            })
        }
    }
}

/// Checks a workflow against the registry. Pure: nothing is persisted or
/// executed.
pub fn validate(workflow: &Workflow, registry: &NodeRegistry) -> ValidationResult {
    let mut check = Check {
        workflow,
        registry,
        graph: WorkflowGraph::build(workflow),
        definitions: HashMap::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    check.node_types();
    check.field_values();
    let trigger = check.trigger();
    check.edges();
    check.acyclic();
    if let Some(trigger) = trigger {
        check.reachability(&trigger);
    }
    check.references();

    ValidationResult {
        workflow_id: workflow.id,
        errors: check.errors,
        warnings: check.warnings,
    }
}

struct Check<'a> {
    workflow: &'a Workflow,
    registry: &'a NodeRegistry,
    graph: WorkflowGraph,
    definitions: HashMap<&'a str, &'a NodeDefinition>,
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationError>,
}

impl<'a> Check<'a> {
    fn definition(&self, node: &WorkflowNode) -> Option<&'a NodeDefinition> {
        self.definitions.get(node.id.as_str()).copied()
    }

    fn node_types(&mut self) {
        let mut seen = HashSet::new();
        for node in &self.workflow.nodes {
            if !seen.insert(node.id.as_str()) {
                self.errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
                continue;
            }
            match self.registry.lookup(&node.node_type) {
                Ok(def) => {
                    self.definitions.insert(node.id.as_str(), def);
                }
                Err(_) => self.errors.push(ValidationError::UnknownType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                }),
            }
        }

        let mut seen = HashSet::new();
        for edge in &self.workflow.edges {
            if !seen.insert(edge.id.as_str()) {
                self.errors.push(ValidationError::DuplicateEdgeId(edge.id.clone()));
            }
        }
    }

    fn field_values(&mut self) {
        for node in &self.workflow.nodes {
            let Some(def) = self.definition(node) else {
                continue;
            };

            for (name, value) in &node.field_values {
                match def.field(name) {
                    Some(field) => {
                        if let Err(e) = check_field(node, field, value) {
                            self.errors.push(e);
                        }
                    }
                    None => self.warnings.push(ValidationError::UnknownField {
                        node_id: node.id.clone(),
                        field: name.clone(),
                    }),
                }
            }

            for field in def.fields.iter().filter(|f| f.required && f.default_value.is_none()) {
                if !node.field_values.contains_key(&field.name) {
                    self.errors.push(ValidationError::MissingRequiredField {
                        node_id: node.id.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
    }

    /// Returns the trigger node id when there is exactly one.
    fn trigger(&mut self) -> Option<NodeId> {
        let triggers: Vec<&WorkflowNode> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| self.definition(n).is_some_and(|d| d.category.is_trigger()))
            .collect();

        let trigger = match triggers.as_slice() {
            [] => {
                self.errors.push(ValidationError::MissingTrigger);
                None
            }
            [only] => Some(*only),
            many => {
                self.errors.push(ValidationError::MultipleTriggers(
                    many.iter().map(|n| n.id.clone()).collect(),
                ));
                None
            }
        };

        if let Some(node) = trigger {
            if self.workflow.incoming(&node.id).next().is_some() {
                self.errors
                    .push(ValidationError::TriggerHasIncomingEdge(node.id.clone()));
            }
            if let Some(NodeCategory::Trigger(kind)) = self.definition(node).map(|d| d.category) {
                let configured = self.workflow.trigger.kind();
                if kind != configured {
                    self.errors
                        .push(ValidationError::TriggerMismatch { node: kind, configured });
                }
            }
        }

        for node in &self.workflow.nodes {
            let is_trigger = triggers.iter().any(|t| t.id == node.id);
            if !is_trigger && self.workflow.incoming(&node.id).next().is_none() {
                self.errors
                    .push(ValidationError::MissingIncomingEdge(node.id.clone()));
            }
        }

        trigger.map(|n| n.id.clone())
    }

    fn edges(&mut self) {
        let mut occupied: HashMap<(&str, &str), usize> = HashMap::new();

        for edge in &self.workflow.edges {
            let source = self.workflow.find_node(&edge.source);
            let target = self.workflow.find_node(&edge.target);

            let dangling = |reason: String| ValidationError::DanglingEdge {
                edge_id: edge.id.clone(),
                reason,
            };

            let (Some(source), Some(target)) = (source, target) else {
                let missing = if source.is_none() { &edge.source } else { &edge.target };
                self.errors
                    .push(dangling(format!("node '{}' does not exist", missing)));
                continue;
            };

            if let Some(def) = self.definition(source) {
                if !def.has_output(&edge.source_handle) {
                    self.errors.push(dangling(format!(
                        "'{}' has no output handle '{}'",
                        source.id, edge.source_handle
                    )));
                }
            }
            if let Some(def) = self.definition(target) {
                if !def.has_input(&edge.target_handle) {
                    self.errors.push(dangling(format!(
                        "'{}' has no input handle '{}'",
                        target.id, edge.target_handle
                    )));
                }
            }

            let count = occupied
                .entry((edge.target.as_str(), edge.target_handle.as_str()))
                .or_default();
            *count += 1;
            if *count == 2 {
                self.errors.push(ValidationError::TargetHandleOccupied {
                    node_id: edge.target.clone(),
                    handle: edge.target_handle.clone(),
                });
            }
        }
    }

    fn acyclic(&mut self) {
        if let Some(node) = self.graph.find_cycle() {
            self.errors.push(ValidationError::CycleDetected(node));
        }
    }

    fn reachability(&mut self, trigger: &str) {
        let reachable = self.graph.reachable_from(trigger);
        for node in &self.workflow.nodes {
            if !reachable.contains(&node.id) {
                self.warnings
                    .push(ValidationError::Unreachable(node.id.clone()));
            }
        }
    }

    /// Every reference must name an ancestor and one of its declared output
    /// variables. Trigger outputs carry the arbitrary trigger payload, so any
    /// variable name is accepted for them.
    fn references(&mut self) {
        for node in &self.workflow.nodes {
            let mut refs: Vec<_> = node
                .field_values
                .values()
                .flat_map(resolver::value_references)
                .collect();
            if refs.is_empty() {
                continue;
            }
            refs.sort_by(|a, b| a.token.cmp(&b.token));
            refs.dedup();

            let ancestors = self.graph.ancestors(&node.id);
            for reference in refs {
                let upstream = self
                    .workflow
                    .find_node(&reference.node_id)
                    .filter(|_| ancestors.contains(&reference.node_id));

                let declared = upstream.and_then(|n| self.definition(n)).map(|def| {
                    def.category.is_trigger() || def.declares_variable(reference.root_variable())
                });

                if declared != Some(true) {
                    self.errors.push(ValidationError::UnresolvedVariable {
                        node_id: node.id.clone(),
                        reference: reference.token,
                    });
                }
            }
        }
    }
}

/// Literal field checks. Values carrying references are typed once they
/// are resolved at execution time.
fn check_field(
    node: &WorkflowNode,
    field: &FieldDefinition,
    value: &Value,
) -> Result<(), ValidationError> {
    if resolver::has_references(value) {
        return Ok(());
    }

    if value.is_blank() {
        if field.required && field.default_value.is_none() {
            return Err(ValidationError::MissingRequiredField {
                node_id: node.id.clone(),
                field: field.name.clone(),
            });
        }
        return Ok(());
    }

    let bad_type = |actual: String| ValidationError::BadFieldType {
        node_id: node.id.clone(),
        field: field.name.clone(),
        expected: field.field_type,
        actual,
    };

    let coerced = field
        .field_type
        .coerce(value.clone())
        .map_err(|_| bad_type(value.type_name().to_string()))?;

    if field.constrains_options() {
        let chosen = coerced.to_string();
        if !field.options.iter().any(|o| o.value == chosen) {
            return Err(bad_type(format!("'{}' which is not one of the options", chosen)));
        }
    }

    Ok(())
}
