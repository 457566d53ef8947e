use flowcore::{EventBus, ExecutionEvent, NodeEvent};
use uuid::Uuid;

#[tokio::test]
async fn emitter_events_reach_every_subscriber() {
    let bus = EventBus::new(16);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    let execution_id = Uuid::new_v4();
    let emitter = bus.create_emitter(execution_id, "mail".to_string());
    emitter.info("sending");
    emitter.progress(50.0, Some("halfway".into()));

    for rx in [&mut first, &mut second] {
        match rx.recv().await.unwrap() {
            ExecutionEvent::NodeEvent {
                execution_id: id,
                node_id,
                event: NodeEvent::Info { message },
                ..
            } => {
                assert_eq!(id, execution_id);
                assert_eq!(node_id, "mail");
                assert_eq!(message, "sending");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::NodeEvent {
                event: NodeEvent::Progress { .. },
                ..
            }
        ));
    }
}

#[test]
fn emitting_without_subscribers_is_harmless() {
    let bus = EventBus::new(0);
    bus.create_emitter(Uuid::new_v4(), "n".into())
        .warn("nobody listening");
}

#[test]
fn events_serialize_with_type_tags() {
    let execution_id = Uuid::new_v4();
    let event = ExecutionEvent::NodeEvent {
        execution_id,
        node_id: "n1".into(),
        event: NodeEvent::Warning {
            message: "slow".into(),
        },
        timestamp: chrono::Utc::now(),
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "NodeEvent");
    assert_eq!(json["event"]["event_type"], "Warning");
    assert_eq!(json["event"]["message"], "slow");
    assert_eq!(event.execution_id(), execution_id);
}
