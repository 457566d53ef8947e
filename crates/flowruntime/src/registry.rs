use flowcore::{
    DefinitionError, DynamicOptionsSource, FieldDefinition, NodeAdapter, NodeDefinition,
    OptionsProvider, SelectOption, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node types and the adapters bound to them.
///
/// Populated once during startup through `&mut` access, then wrapped in an
/// `Arc` and shared read-only by the runtime, validator and executor.
pub struct NodeRegistry {
    definitions: HashMap<String, NodeDefinition>,
    adapters: HashMap<String, Arc<dyn NodeAdapter>>,
    options: HashMap<DynamicOptionsSource, Arc<dyn OptionsProvider>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            adapters: HashMap::new(),
            options: HashMap::new(),
        }
    }

    /// Register a node definition
    pub fn register(&mut self, definition: NodeDefinition) -> Result<(), DefinitionError> {
        if self.definitions.contains_key(&definition.node_type) {
            return Err(DefinitionError::DuplicateType(definition.node_type));
        }
        tracing::debug!("Registering node type: {}", definition.node_type);
        self.definitions
            .insert(definition.node_type.clone(), definition);
        Ok(())
    }

    pub fn lookup(&self, node_type: &str) -> Result<&NodeDefinition, DefinitionError> {
        self.definitions
            .get(node_type)
            .ok_or_else(|| DefinitionError::UnknownType(node_type.to_string()))
    }

    /// Bind an adapter to an already registered node type. A later
    /// registration for the same type replaces the earlier one.
    pub fn register_adapter(&mut self, adapter: Arc<dyn NodeAdapter>) -> Result<(), DefinitionError> {
        let node_type = adapter.node_type().to_string();
        self.lookup(&node_type)?;
        tracing::debug!("Binding adapter for node type: {}", node_type);
        self.adapters.insert(node_type, adapter);
        Ok(())
    }

    pub fn adapter(&self, node_type: &str) -> Option<Arc<dyn NodeAdapter>> {
        self.adapters.get(node_type).cloned()
    }

    pub fn register_options_provider(&mut self, provider: Arc<dyn OptionsProvider>) {
        self.options.insert(provider.source(), provider);
    }

    /// Current options for a field backed by a dynamic source.
    ///
    /// Callers that get `DynamicOptionsUnavailable` should fall back to
    /// free text input.
    pub async fn resolve_dynamic_options(
        &self,
        field: &FieldDefinition,
        context: &HashMap<String, Value>,
    ) -> Result<Vec<SelectOption>, DefinitionError> {
        let unavailable = |reason: String| DefinitionError::DynamicOptionsUnavailable {
            field: field.name.clone(),
            reason,
        };

        let Some(source) = field.dynamic_options else {
            return Ok(field.options.clone());
        };
        let provider = self
            .options
            .get(&source)
            .ok_or_else(|| unavailable(format!("no provider for {}", source)))?;

        provider.options(context).await.map_err(|e| {
            tracing::warn!("Options provider for {} failed: {}", source, e);
            unavailable(e.message)
        })
    }

    /// Every registered definition, ordered by category then type
    pub fn definitions(&self) -> Vec<&NodeDefinition> {
        let mut defs: Vec<_> = self.definitions.values().collect();
        defs.sort_by(|a, b| {
            a.category
                .rank()
                .cmp(&b.category.rank())
                .then_with(|| a.node_type.cmp(&b.node_type))
        });
        defs
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
