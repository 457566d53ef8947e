use flowcore::{EventBus, NodeAdapter, NodeContext, Value};
use flownodes::{AiClient, AiGenerate, AiGrade, AiSummarize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Answers a single HTTP request with a canned response and hands back the
/// JSON body it received.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let (header_end, content_length) = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                break (pos + 4, length);
            }
        };
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        serde_json::from_slice(&buf[header_end..header_end + content_length]).unwrap()
    });

    (url, handle)
}

fn context(node_type: &str, fields: &[(&str, Value)]) -> NodeContext {
    let bus = EventBus::default();
    let execution_id = Uuid::new_v4();
    NodeContext {
        execution_id,
        node_id: "ai".into(),
        node_type: node_type.into(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        trigger_context: Arc::new(HashMap::new()),
        triggered_by: "teacher1".into(),
        attempt: 1,
        events: bus.create_emitter(execution_id, "ai".into()),
        cancellation: CancellationToken::new(),
    }
}

#[tokio::test]
async fn generate_posts_prompt_and_maps_reply() {
    let (url, server) = serve_once("200 OK", r#"{"text": "Photosynthesis quiz", "tokens_used": 42}"#).await;
    let adapter = AiGenerate::new(Arc::new(AiClient::new(url)));

    let output = adapter
        .execute(context(
            "ai-generate",
            &[
                ("prompt", Value::from("Write a quiz")),
                ("maxTokens", Value::Number(200.0)),
                ("temperature", Value::Number(0.2)),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(
        output.outputs.get("aiGeneratedText"),
        Some(&Value::String("Photosynthesis quiz".into()))
    );
    assert_eq!(output.outputs.get("tokensUsed"), Some(&Value::Number(42.0)));

    let sent = server.await.unwrap();
    assert_eq!(sent["prompt"], "Write a quiz");
    assert_eq!(sent["max_tokens"], 200);
    assert_eq!(sent["temperature"], 0.2);
}

#[tokio::test]
async fn grade_returns_score_and_feedback() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"score": 8.5, "feedback": "Solid", "strengths": ["clear"], "improvements": ["cite sources"]}"#,
    )
    .await;
    let adapter = AiGrade::new(Arc::new(AiClient::new(url)));

    let output = adapter
        .execute(context(
            "ai-grade",
            &[
                ("submission", Value::from("My essay")),
                ("rubric", Value::from("Clarity")),
                ("maxScore", Value::Number(10.0)),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(output.outputs.get("gradeScore"), Some(&Value::Number(8.5)));
    assert_eq!(
        output.outputs.get("gradeFeedback"),
        Some(&Value::String("Solid".into()))
    );
    assert_eq!(
        output.outputs.get("improvements"),
        Some(&Value::Array(vec![Value::String("cite sources".into())]))
    );
    assert_eq!(server.await.unwrap()["max_score"], 10.0);
}

#[tokio::test]
async fn summarize_uses_generate_endpoint() {
    let (url, server) = serve_once("200 OK", r#"{"text": "  Short version. ", "tokens_used": 5}"#).await;
    let adapter = AiSummarize::new(Arc::new(AiClient::new(url)));

    let output = adapter
        .execute(context("ai-summarize", &[("text", Value::from("A long lesson"))]))
        .await
        .unwrap();

    assert_eq!(
        output.outputs.get("summary"),
        Some(&Value::String("Short version.".into()))
    );
    let sent = server.await.unwrap();
    assert!(sent["prompt"].as_str().unwrap().ends_with("A long lesson"));
}

#[tokio::test]
async fn overloaded_service_is_transient() {
    let (url, _server) = serve_once("503 Service Unavailable", r#"{"detail": "busy"}"#).await;
    let adapter = AiGenerate::new(Arc::new(AiClient::new(url)));

    let err = adapter
        .execute(context("ai-generate", &[("prompt", Value::from("hi"))]))
        .await
        .unwrap_err();
    assert!(err.transient);
}

#[tokio::test]
async fn rejected_request_is_permanent() {
    let (url, _server) = serve_once("422 Unprocessable Entity", r#"{"detail": "bad"}"#).await;
    let adapter = AiGenerate::new(Arc::new(AiClient::new(url)));

    let err = adapter
        .execute(context("ai-generate", &[("prompt", Value::from("hi"))]))
        .await
        .unwrap_err();
    assert!(!err.transient);
}

#[tokio::test]
async fn missing_prompt_fails_without_calling_out() {
    let adapter = AiGenerate::new(Arc::new(AiClient::new("http://127.0.0.1:9")));
    let err = adapter
        .execute(context("ai-generate", &[]))
        .await
        .unwrap_err();
    assert!(!err.transient);
    assert!(err.message.contains("prompt"));
}

#[tokio::test]
async fn unreachable_service_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let adapter = AiGenerate::new(Arc::new(AiClient::new(url)));
    let err = adapter
        .execute(context("ai-generate", &[("prompt", Value::from("hi"))]))
        .await
        .unwrap_err();
    assert!(err.transient, "{}", err);
}
