mod common;

use chrono::Utc;
use common::*;
use flowcore::{
    AdapterError, EngineError, ExecutionEvent, ExecutionStatus, FlowError, NodeOutput, NodeStatus,
    TriggerConfig, Value, Workflow, WorkflowNode,
};
use flowruntime::{
    ExecutionStore, FlowRuntime, MemoryStore, RuntimeConfig, TriggerRequest, CANCELLED,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn single_action(message: &str) -> Workflow {
    let mut wf = Workflow::new("Single", TriggerConfig::Manual);
    wf.add_node(WorkflowNode::new("start", MANUAL));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", message));
    wf.connect("start", "out", "act", "in");
    wf
}

#[tokio::test]
async fn manual_run_exposes_caller_to_downstream_nodes() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = single_action("Sent by {{start.triggeredBy}}");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.triggered_by, "teacher1");
    let start = record.node("start").unwrap();
    assert_eq!(
        start.output.get("triggeredBy"),
        Some(&Value::String("teacher1".into()))
    );
    assert!(start.output.contains_key("triggeredAt"));
    assert_eq!(
        record.node("act").unwrap().output.get("echo"),
        Some(&Value::String("Sent by teacher1".into()))
    );
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let adapter = Arc::new(ScriptedAdapter::with_script(vec![
        Err(AdapterError::transient("mail server busy")),
        Ok(NodeOutput::new().with_output("echo", "delivered")),
    ]));
    let runtime = runtime_with(adapter.clone());
    let wf = single_action("hi");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();
    let mut events = runtime.subscribe_events();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    let act = record.node("act").unwrap();
    assert_eq!(act.status, NodeStatus::Succeeded);
    assert_eq!(act.attempts, 2);
    assert_eq!(adapter.calls(), 2);

    let mut retried = false;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { attempt, error, .. } = event {
            assert_eq!(attempt, 1);
            assert_eq!(error, "mail server busy");
            retried = true;
        }
    }
    assert!(retried);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let adapter = Arc::new(ScriptedAdapter::with_script(vec![Err(AdapterError::permanent(
        "invalid address",
    ))]));
    let runtime = runtime_with(adapter.clone());
    let wf = single_action("hi");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    let act = record.node("act").unwrap();
    assert_eq!(act.status, NodeStatus::Failed);
    assert_eq!(act.attempts, 1);
    assert_eq!(act.error.as_deref(), Some("invalid address"));
    assert_eq!(adapter.calls(), 1);
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn timed_out_attempts_are_retried() {
    let adapter = Arc::new(ScriptedAdapter::slow(Duration::from_millis(500)));
    let runtime = runtime_with(adapter.clone());

    let mut wf = Workflow::new("Slow", TriggerConfig::Manual);
    wf.add_node(WorkflowNode::new("start", MANUAL));
    wf.add_node(
        WorkflowNode::new("act", ACTION)
            .with_field("message", "hi")
            .with_timeout(50)
            .with_retry(2, 10),
    );
    wf.connect("start", "out", "act", "in");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    let act = record.node("act").unwrap();
    assert_eq!(act.status, NodeStatus::Failed);
    assert_eq!(act.attempts, 2);
    assert!(act.error.as_deref().unwrap().contains("Timed out after 50ms"));
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn cancelled_execution_ends_failed() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));

    let mut wf = Workflow::new("Waiting", TriggerConfig::Manual);
    wf.add_node(WorkflowNode::new("start", MANUAL));
    wf.add_node(WorkflowNode::new("wait", DELAY).with_field("duration", 10_000.0));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", "late"));
    wf.connect("start", "out", "wait", "in");
    wf.connect("wait", "out", "act", "in");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let execution_id = runtime
        .submit(TriggerRequest::manual(id, "teacher1", HashMap::new()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.cancel(execution_id).await.unwrap();

    let mut record = runtime.get_execution(execution_id).await.unwrap();
    for _ in 0..100 {
        if record.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        record = runtime.get_execution(execution_id).await.unwrap();
    }

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(CANCELLED));
    assert_eq!(record.node_status("start"), Some(NodeStatus::Succeeded));
    assert_eq!(record.node("wait").unwrap().error.as_deref(), Some(CANCELLED));
    assert_eq!(record.node_status("act"), Some(NodeStatus::Skipped));

    // Cancelling again is a no-op
    runtime.cancel(execution_id).await.unwrap();
}

#[tokio::test]
async fn cancelling_unknown_execution_is_an_error() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let err = runtime.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Engine(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn inactive_workflow_is_not_run() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let mut wf = single_action("hi");
    wf.is_active = false;
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let err = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Engine(EngineError::WorkflowInactive(_))));
    assert!(runtime.get_executions(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn webhook_payload_reaches_downstream_nodes() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));

    let trigger = TriggerConfig::webhook();
    let TriggerConfig::Webhook { token } = trigger.clone() else {
        unreachable!()
    };
    let mut wf = Workflow::new("Late arrival", trigger);
    wf.add_node(WorkflowNode::new("hook", WEBHOOK));
    wf.add_node(WorkflowNode::new("flat", ACTION).with_field("message", "{{hook.studentName}}"));
    wf.add_node(
        WorkflowNode::new("nested", ACTION).with_field("message", "{{hook.payload.studentName}}"),
    );
    wf.connect("hook", "out", "flat", "in");
    wf.connect("hook", "out", "nested", "in");
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_webhook(&token, serde_json::json!({ "studentName": "Linh" }))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.triggered_by, "webhook");
    for node in ["flat", "nested"] {
        assert_eq!(
            record.node(node).unwrap().output.get("echo"),
            Some(&Value::String("Linh".into())),
            "{}",
            node
        );
    }

    let err = runtime
        .trigger_webhook("not-a-token", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Engine(EngineError::WebhookNotFound)));
}

#[tokio::test]
async fn scheduled_run_records_the_tick() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));

    let mut wf = Workflow::new("Morning", TriggerConfig::schedule("0 8 * * 1-5"));
    wf.add_node(WorkflowNode::new("tick", SCHEDULE));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", "{{tick.scheduledAt}}"));
    wf.connect("tick", "out", "act", "in");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let at = Utc::now();
    let record = runtime
        .execute(TriggerRequest::schedule(id, at))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.triggered_by, "scheduler");
    assert_eq!(
        record.node("act").unwrap().output.get("echo"),
        Some(&Value::String(at.to_rfc3339()))
    );
}

#[tokio::test]
async fn completed_sibling_branch_makes_run_partially_failed() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));

    let mut wf = Workflow::new("Fan out", TriggerConfig::Manual);
    wf.add_node(WorkflowNode::new("start", MANUAL));
    wf.add_node(WorkflowNode::new("bad", ACTION).with_field("message", "fail"));
    wf.add_node(WorkflowNode::new("good", ACTION).with_field("message", "ok"));
    wf.connect("start", "out", "bad", "in");
    wf.connect("start", "out", "good", "in");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::PartiallyFailed);
    assert_eq!(record.node_status("bad"), Some(NodeStatus::Failed));
    assert_eq!(record.node_status("good"), Some(NodeStatus::Succeeded));
    assert!(record.error.is_none());
}

#[tokio::test]
async fn executions_are_listed_most_recent_first() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = single_action("hi");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let first = runtime.trigger_manual(id, "a", HashMap::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = runtime.trigger_manual(id, "b", HashMap::new()).await.unwrap();

    let listed = runtime.get_executions(id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);
}

#[tokio::test]
async fn events_bracket_the_execution() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = single_action("hi");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();
    let mut events = runtime.subscribe_events();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id(), record.id);
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ExecutionEvent::ExecutionStarted { .. })));
    assert!(matches!(
        seen.last(),
        Some(ExecutionEvent::ExecutionFinished {
            status: ExecutionStatus::Succeeded,
            ..
        })
    ));
    let succeeded = seen
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 2);
}

#[tokio::test]
async fn finished_records_are_immutable() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let wf = single_action("hi");
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();
    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    let store = MemoryStore::new();
    store.save_execution(record.clone()).await.unwrap();
    let mut tampered = record.clone();
    tampered.status = ExecutionStatus::Failed;
    let err = store.save_execution(tampered).await.unwrap_err();
    assert!(matches!(err, flowcore::StoreError::Immutable(eid) if eid == record.id));
}

#[tokio::test]
async fn fan_out_respects_parallel_limit() {
    let adapter = Arc::new(ScriptedAdapter::slow(Duration::from_millis(100)));
    let config = RuntimeConfig {
        max_parallel_nodes: 2,
        ..fast_config()
    };
    let runtime = FlowRuntime::new(registry_with(adapter.clone()), config);

    let mut wf = Workflow::new("Fan out", TriggerConfig::Manual);
    wf.add_node(WorkflowNode::new("start", MANUAL));
    for i in 0..4 {
        let id = format!("send{}", i);
        wf.add_node(WorkflowNode::new(id.as_str(), ACTION).with_field("message", "hi"));
        wf.connect("start", "out", id.as_str(), "in");
    }
    let id = wf.id;
    runtime.register_workflow(wf).await.unwrap();

    let record = runtime
        .trigger_manual(id, "teacher1", HashMap::new())
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(adapter.calls(), 4);
    assert!(adapter.peak() <= 2, "peak was {}", adapter.peak());
}

fn webhook_workflow(token: &str) -> Workflow {
    let mut wf = Workflow::new(
        "Hook",
        TriggerConfig::Webhook {
            token: token.to_string(),
        },
    );
    wf.add_node(WorkflowNode::new("hook", WEBHOOK));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", "hi"));
    wf.connect("hook", "out", "act", "in");
    wf
}

#[tokio::test]
async fn webhook_token_cannot_be_claimed_twice() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let token = "a1b2c3d4e5f6a7b8c9d0";

    let owner = webhook_workflow(token);
    let owner_id = owner.id;
    runtime.register_workflow(owner.clone()).await.unwrap();

    let other = webhook_workflow(token);
    let err = runtime.register_workflow(other.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Engine(EngineError::WebhookTokenTaken(id)) if id == owner_id
    ));
    assert!(runtime.get_workflow(other.id).await.is_err());
    assert_eq!(runtime.resolve_webhook(token).await.unwrap(), owner_id);

    // The owner may re-register with its own token
    runtime.register_workflow(owner).await.unwrap();
    assert_eq!(runtime.resolve_webhook(token).await.unwrap(), owner_id);
}

#[tokio::test]
async fn short_webhook_tokens_are_rejected() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    for token in ["", "   ", "shared"] {
        let err = runtime
            .register_workflow(webhook_workflow(token))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Engine(EngineError::WeakWebhookToken { .. })
        ));
    }
}
