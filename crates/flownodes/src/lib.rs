//! Classroom node library
//!
//! The catalog of node kinds, the AI service adapters and a set of echo
//! adapters that stand in for the classroom backends.

mod ai;
pub mod catalog;
mod echo;

pub use ai::{AiClient, AiGenerate, AiGrade, AiSummarize, DEFAULT_AI_SERVICE_URL};
pub use echo::{EchoAdapter, StaticOptionsProvider};
use flowcore::{DefinitionError, DynamicOptionsSource, SelectOption};
use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register every node definition of the catalog
pub fn register_catalog(registry: &mut NodeRegistry) -> Result<(), DefinitionError> {
    for definition in catalog::definitions() {
        registry.register(definition)?;
    }
    Ok(())
}

/// Attach an echo adapter to every adapter-backed node type that has none yet
pub fn register_echo_adapters(registry: &mut NodeRegistry) -> Result<(), DefinitionError> {
    for node_type in catalog::ADAPTER_TYPES {
        if registry.adapter(node_type).is_some() {
            continue;
        }
        let definition = registry.lookup(node_type)?.clone();
        registry.register_adapter(Arc::new(EchoAdapter::new(definition)))?;
    }
    Ok(())
}

/// Attach the AI service adapters
pub fn register_ai_adapters(
    registry: &mut NodeRegistry,
    base_url: &str,
) -> Result<(), DefinitionError> {
    let client = Arc::new(AiClient::new(base_url));
    registry.register_adapter(Arc::new(AiGenerate::new(client.clone())))?;
    registry.register_adapter(Arc::new(AiGrade::new(client.clone())))?;
    registry.register_adapter(Arc::new(AiSummarize::new(client)))?;
    Ok(())
}

/// Sample option lists for the dynamic select fields
pub fn register_sample_options(registry: &mut NodeRegistry) {
    let classes = vec![
        SelectOption::new("Math 10A", "class-math-10a"),
        SelectOption::new("Physics 11B", "class-physics-11b"),
    ];
    let exams = vec![
        SelectOption::new("Midterm", "exam-midterm"),
        SelectOption::new("Final", "exam-final"),
    ];
    registry.register_options_provider(Arc::new(StaticOptionsProvider::new(
        DynamicOptionsSource::Classes,
        classes,
    )));
    registry.register_options_provider(Arc::new(StaticOptionsProvider::new(
        DynamicOptionsSource::Exams,
        exams,
    )));
}

/// Register the catalog with AI adapters against `ai_service_url` and echo
/// adapters for everything else
pub fn register_all(
    registry: &mut NodeRegistry,
    ai_service_url: &str,
) -> Result<(), DefinitionError> {
    register_catalog(registry)?;
    register_ai_adapters(registry, ai_service_url)?;
    register_echo_adapters(registry)?;
    register_sample_options(registry);
    Ok(())
}
