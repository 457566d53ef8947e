use async_trait::async_trait;
use flowcore::{
    ExecutionId, ExecutionRecord, StoreError, Template, TemplateId, Workflow, WorkflowId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Workflow, StoreError>;

    /// Inserts or replaces a workflow
    async fn save_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), StoreError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn load_execution(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError>;

    /// Inserts or updates a record. Finished records are immutable.
    async fn save_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// All executions of a workflow, most recent first
    async fn list_executions(&self, workflow_id: WorkflowId)
        -> Result<Vec<ExecutionRecord>, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn load_template(&self, id: TemplateId) -> Result<Template, StoreError>;

    async fn save_template(&self, template: Template) -> Result<(), StoreError>;

    /// All templates, newest first
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;
}

/// In-process store backing all three persistence traits
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    executions: RwLock<HashMap<ExecutionId, ExecutionRecord>>,
    templates: RwLock<HashMap<TemplateId, Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Workflow", id))
    }

    async fn save_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("Workflow", id))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(workflows)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn load_execution(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Execution", id))
    }

    async fn save_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.get(&record.id).is_some_and(|r| r.is_finished()) {
            return Err(StoreError::Immutable(record.id));
        }
        executions.insert(record.id, record);
        Ok(())
    }

    async fn list_executions(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<_> = self
            .executions
            .read()
            .await
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn load_template(&self, id: TemplateId) -> Result<Template, StoreError> {
        self.templates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Template", id))
    }

    async fn save_template(&self, template: Template) -> Result<(), StoreError> {
        self.templates.write().await.insert(template.id, template);
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let mut templates: Vec<_> = self.templates.read().await.values().cloned().collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(templates)
    }
}
