use crate::registry::NodeRegistry;
use crate::resolver;
use crate::store::{TemplateStore, WorkflowStore};
use chrono::Utc;
use flowcore::{
    Edge, EngineError, FlowError, NodeCategory, NodeId, StoreError, Template, TemplateId,
    TriggerConfig, TriggerKind, Value, Workflow, WorkflowId, WorkflowNode,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Caller-supplied values applied when a template becomes a workflow
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateOverrides {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl TemplateOverrides {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Descriptive fields for a template saved from a workflow
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Clone)]
pub struct TemplateService {
    registry: Arc<NodeRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    templates: Arc<dyn TemplateStore>,
}

impl TemplateService {
    pub fn new(
        registry: Arc<NodeRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self {
            registry,
            workflows,
            templates,
        }
    }

    pub async fn get(&self, id: TemplateId) -> Result<Template, FlowError> {
        self.templates.load_template(id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => EngineError::TemplateNotFound(id).into(),
            other => other.into(),
        })
    }

    /// Templates, newest first
    pub async fn list(&self) -> Result<Vec<Template>, FlowError> {
        Ok(self.templates.list_templates().await?)
    }

    /// Builds a new, inactive workflow from a template. Every node and edge
    /// gets a fresh id and references are rewritten to match, so repeated
    /// instantiation never produces overlapping ids. Nothing is persisted.
    pub async fn instantiate(
        &self,
        template_id: TemplateId,
        overrides: TemplateOverrides,
    ) -> Result<Workflow, FlowError> {
        let template = self.get(template_id).await?;

        let ids: HashMap<NodeId, NodeId> = template
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Uuid::new_v4().to_string()))
            .collect();
        let remap = |id: &NodeId| ids.get(id).cloned().unwrap_or_else(|| id.clone());

        let nodes: Vec<WorkflowNode> = template
            .nodes
            .iter()
            .map(|node| WorkflowNode {
                id: remap(&node.id),
                field_values: node
                    .field_values
                    .iter()
                    .map(|(k, v)| (k.clone(), resolver::rewrite_references(v, &ids)))
                    .collect(),
                ..node.clone()
            })
            .collect();

        let edges: Vec<Edge> = template
            .edges
            .iter()
            .map(|edge| Edge {
                id: Uuid::new_v4().to_string(),
                source: remap(&edge.source),
                target: remap(&edge.target),
                ..edge.clone()
            })
            .collect();

        let trigger = overrides
            .trigger
            .unwrap_or_else(|| self.default_trigger(&template.nodes));

        let mut workflow = Workflow::new(overrides.name, trigger);
        workflow.description = overrides.description.or(template.description);
        workflow.created_by = overrides.created_by.or(template.created_by);
        workflow.nodes = nodes;
        workflow.edges = edges;
        workflow.is_active = false;

        tracing::info!(
            "Instantiated template {} as workflow {}",
            template_id,
            workflow.id
        );
        Ok(workflow)
    }

    /// Trigger configuration matching the template's trigger node. Schedules
    /// start out on a weekday-morning cron for the author to adjust.
    fn default_trigger(&self, nodes: &[WorkflowNode]) -> TriggerConfig {
        let kind = nodes.iter().find_map(|n| match self.registry.lookup(&n.node_type) {
            Ok(def) => match def.category {
                NodeCategory::Trigger(kind) => Some(kind),
                _ => None,
            },
            Err(_) => None,
        });

        match kind {
            Some(TriggerKind::Webhook) => TriggerConfig::webhook(),
            Some(TriggerKind::Schedule) => {
                let cron = nodes
                    .iter()
                    .find_map(|n| n.field_values.get("cron"))
                    .and_then(|v| v.as_str())
                    .filter(|c| !resolver::has_references(&Value::from(*c)))
                    .unwrap_or(DEFAULT_CRON);
                TriggerConfig::schedule(cron)
            }
            _ => TriggerConfig::Manual,
        }
    }

    /// Snapshots the graph of a stored workflow into a new template
    pub async fn save_as_template(
        &self,
        workflow_id: WorkflowId,
        meta: TemplateMeta,
    ) -> Result<Template, FlowError> {
        let workflow = self.workflows.load_workflow(workflow_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => FlowError::from(EngineError::WorkflowNotFound(workflow_id)),
            other => other.into(),
        })?;

        let mut template = Template::from_workflow(&workflow, meta.name);
        template.description = meta.description.or(template.description);
        template.category = meta.category;
        template.created_by = meta.created_by.or(template.created_by);
        template.created_at = Utc::now();

        self.templates.save_template(template.clone()).await?;
        tracing::info!("Saved workflow {} as template {}", workflow_id, template.id);
        Ok(template)
    }
}

const DEFAULT_CRON: &str = "0 8 * * 1-5";
