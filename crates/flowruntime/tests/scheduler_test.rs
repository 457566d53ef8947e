mod common;

use common::*;
use flowcore::{EngineError, TriggerConfig, Workflow, WorkflowNode};
use flowruntime::Scheduler;
use std::sync::Arc;

fn scheduled(cron: &str) -> Workflow {
    let mut wf = Workflow::new("Morning digest", TriggerConfig::schedule(cron));
    wf.add_node(WorkflowNode::new("tick", SCHEDULE));
    wf.add_node(WorkflowNode::new("act", ACTION).with_field("message", "digest"));
    wf.connect("tick", "out", "act", "in");
    wf
}

#[tokio::test]
async fn only_active_schedules_get_timers() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let scheduler = Scheduler::new(runtime.clone());

    let active = scheduled("0 8 * * 1-5");
    let mut inactive = scheduled("0 8 * * 1-5");
    inactive.is_active = false;
    let mut manual = Workflow::new("Manual", TriggerConfig::Manual);
    manual.add_node(WorkflowNode::new("start", MANUAL));

    for wf in [&active, &inactive, &manual] {
        runtime.register_workflow(wf.clone()).await.unwrap();
    }

    assert_eq!(scheduler.load_active().await.unwrap(), 1);
    assert!(scheduler.is_scheduled(active.id).await);
    assert!(!scheduler.is_scheduled(inactive.id).await);
    assert!(!scheduler.is_scheduled(manual.id).await);

    // Deactivating drops the timer
    let mut paused = active.clone();
    paused.is_active = false;
    assert!(!scheduler.schedule(&paused).await.unwrap());
    assert!(!scheduler.is_scheduled(active.id).await);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn malformed_cron_is_rejected() {
    let runtime = runtime_with(Arc::new(ScriptedAdapter::echo()));
    let scheduler = Scheduler::new(runtime);

    let err = scheduler.schedule(&scheduled("every morning")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule { .. }));
}
