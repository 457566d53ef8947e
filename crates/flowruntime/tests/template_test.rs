mod common;

use common::*;
use flowcore::{EngineError, FlowError, TriggerConfig, Value, Workflow, WorkflowNode};
use flowruntime::{TemplateMeta, TemplateOverrides};
use std::collections::HashSet;
use std::sync::Arc;

/// start -> a -> b -> c, plus start -> d
fn five_node_workflow() -> Workflow {
    let mut wf = Workflow::new("Exam follow-up", TriggerConfig::Manual)
        .with_description("Chases students after an exam");
    wf.add_node(WorkflowNode::new("start", MANUAL));
    wf.add_node(WorkflowNode::new("a", ACTION).with_field("message", "first"));
    wf.add_node(WorkflowNode::new("b", ACTION).with_field("message", "after {{a.echo}}"));
    wf.add_node(WorkflowNode::new("c", ACTION).with_field("message", "{{b.echo}}"));
    wf.add_node(WorkflowNode::new("d", ACTION).with_field("message", "{{start.triggeredBy}}"));
    wf.connect("start", "out", "a", "in");
    wf.connect("a", "out", "b", "in");
    wf.connect("b", "out", "c", "in");
    wf.connect("start", "out", "d", "in");
    wf
}

#[tokio::test]
async fn instantiating_twice_yields_disjoint_graphs() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = five_node_workflow();
    let source_id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let template = runtime
        .save_as_template(
            source_id,
            TemplateMeta {
                name: "Follow-up".into(),
                category: Some("exams".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(template.nodes.len(), 5);
    assert_eq!(template.edges.len(), 4);
    assert_eq!(template.description.as_deref(), Some("Chases students after an exam"));

    let first = runtime
        .templates()
        .instantiate(template.id, TemplateOverrides::named("Copy 1"))
        .await
        .unwrap();
    let second = runtime
        .templates()
        .instantiate(template.id, TemplateOverrides::named("Copy 2"))
        .await
        .unwrap();

    for copy in [&first, &second] {
        assert_eq!(copy.nodes.len(), 5);
        assert_eq!(copy.edges.len(), 4);
        assert!(!copy.is_active);
        assert_eq!(copy.trigger, TriggerConfig::Manual);
        assert!(runtime.validate(copy).is_valid());
    }
    assert_ne!(first.id, second.id);

    let node_ids = |wf: &Workflow| wf.nodes.iter().map(|n| n.id.clone()).collect::<HashSet<_>>();
    let edge_ids = |wf: &Workflow| wf.edges.iter().map(|e| e.id.clone()).collect::<HashSet<_>>();
    assert!(node_ids(&first).is_disjoint(&node_ids(&second)));
    assert!(edge_ids(&first).is_disjoint(&edge_ids(&second)));
    assert!(node_ids(&first).is_disjoint(&node_ids(&five_node_workflow())));
}

#[tokio::test]
async fn references_follow_renamed_nodes() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = five_node_workflow();
    let source_id = wf.id;
    runtime.register_workflow(wf).await.unwrap();
    let template = runtime
        .save_as_template(source_id, TemplateMeta { name: "T".into(), ..Default::default() })
        .await
        .unwrap();

    let mut overrides = TemplateOverrides::named("Live copy");
    overrides.created_by = Some("teacher2".into());
    let copy = runtime.use_template(template.id, overrides).await.unwrap();
    assert_eq!(copy.created_by.as_deref(), Some("teacher2"));

    // use_template registers the copy, inactive
    let stored = runtime.get_workflow(copy.id).await.unwrap();
    assert!(!stored.is_active);

    let a = copy
        .nodes
        .iter()
        .find(|n| n.field_values.get("message") == Some(&Value::from("first")))
        .unwrap();
    let b = copy
        .nodes
        .iter()
        .find(|n| {
            n.field_values
                .get("message")
                .and_then(Value::as_str)
                .is_some_and(|m| m.starts_with("after"))
        })
        .unwrap();
    assert_eq!(
        b.field_values.get("message"),
        Some(&Value::String(format!("after {{{{{}.echo}}}}", a.id)))
    );
}

#[tokio::test]
async fn schedule_templates_default_to_weekday_mornings() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));

    let mut wf = Workflow::new("Daily", TriggerConfig::schedule("30 7 * * *"));
    wf.add_node(WorkflowNode::new("tick", SCHEDULE));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", "morning"));
    wf.connect("tick", "out", "act", "in");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let template = runtime
        .save_as_template(id, TemplateMeta { name: "Daily".into(), ..Default::default() })
        .await
        .unwrap();
    let copy = runtime
        .templates()
        .instantiate(template.id, TemplateOverrides::named("Copy"))
        .await
        .unwrap();
    assert_eq!(copy.trigger, TriggerConfig::schedule("0 8 * * 1-5"));
}

#[tokio::test]
async fn unknown_template_is_reported() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let err = runtime
        .use_template(uuid::Uuid::new_v4(), TemplateOverrides::named("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Engine(EngineError::TemplateNotFound(_))));
}
