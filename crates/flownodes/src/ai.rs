//! Adapters backed by the AI text service.
//!
//! The service exposes two JSON endpoints: `POST /generate` and
//! `POST /grade`. Summaries are produced through `/generate` with a
//! summarizing prompt.

use async_trait::async_trait;
use flowcore::{AdapterError, NodeAdapter, NodeContext, NodeOutput, Value};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog;

pub const DEFAULT_AI_SERVICE_URL: &str = "http://localhost:8000";

const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_SCORE: f64 = 100.0;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    #[serde(default)]
    pub tokens_used: u64,
}

#[derive(Debug, Serialize)]
struct GradeRequest<'a> {
    submission: &'a str,
    rubric: &'a str,
    max_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct GradeResponse {
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

/// Thin HTTP client for the AI service, shared by the AI adapters
#[derive(Clone)]
pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
}

impl AiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<GenerateResponse, AdapterError> {
        self.post(
            "generate",
            &GenerateRequest {
                prompt,
                max_tokens,
                temperature,
            },
        )
        .await
    }

    pub async fn grade(
        &self,
        submission: &str,
        rubric: &str,
        max_score: f64,
    ) -> Result<GradeResponse, AdapterError> {
        self.post(
            "grade",
            &GradeRequest {
                submission,
                rubric,
                max_score,
            },
        )
        .await
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        response.json::<R>().await.map_err(|e| {
            AdapterError::permanent(format!("AI service returned an unreadable response: {}", e))
        })
    }
}

/// Network trouble is worth another attempt; malformed requests are not.
fn request_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() || e.is_connect() {
        AdapterError::transient(format!("AI service unreachable: {}", e))
    } else {
        AdapterError::permanent(format!("AI service request failed: {}", e))
    }
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> AdapterError {
    let message = format!("AI service responded with {}", status);
    let error = if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AdapterError::transient(message)
    } else {
        AdapterError::permanent(message)
    };
    if body.is_empty() {
        error
    } else {
        error.with_details(serde_json::json!({ "body": body }))
    }
}

fn number_field(ctx: &NodeContext, name: &str, default: f64) -> f64 {
    ctx.fields
        .get(name)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .unwrap_or(default)
}

pub struct AiGenerate {
    client: Arc<AiClient>,
}

impl AiGenerate {
    pub fn new(client: Arc<AiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeAdapter for AiGenerate {
    fn node_type(&self) -> &str {
        catalog::AI_GENERATE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError> {
        let prompt = ctx.require_str("prompt")?;
        let max_tokens = number_field(&ctx, "maxTokens", DEFAULT_MAX_TOKENS as f64).max(1.0) as u32;
        let temperature = number_field(&ctx, "temperature", DEFAULT_TEMPERATURE);

        ctx.events.info(format!(
            "Generating text ({} tokens max, temperature {})",
            max_tokens, temperature
        ));
        let response = self.client.generate(prompt, max_tokens, temperature).await?;

        Ok(NodeOutput::new()
            .with_output("aiGeneratedText", response.text)
            .with_output("tokensUsed", response.tokens_used as i64))
    }
}

pub struct AiGrade {
    client: Arc<AiClient>,
}

impl AiGrade {
    pub fn new(client: Arc<AiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeAdapter for AiGrade {
    fn node_type(&self) -> &str {
        catalog::AI_GRADE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError> {
        let submission = ctx.require_str("submission")?;
        let rubric = ctx.require_str("rubric")?;
        let max_score = number_field(&ctx, "maxScore", DEFAULT_MAX_SCORE);

        ctx.events.info(format!("Grading submission out of {}", max_score));
        let graded = self.client.grade(submission, rubric, max_score).await?;

        let list = |items: Vec<String>| Value::Array(items.into_iter().map(Value::String).collect());
        Ok(NodeOutput::new()
            .with_output("gradeScore", graded.score)
            .with_output("gradeFeedback", graded.feedback)
            .with_output("strengths", list(graded.strengths))
            .with_output("improvements", list(graded.improvements)))
    }
}

pub struct AiSummarize {
    client: Arc<AiClient>,
}

impl AiSummarize {
    pub fn new(client: Arc<AiClient>) -> Self {
        Self { client }
    }
}

pub(crate) fn summary_prompt(text: &str, length: &str) -> String {
    let guidance = match length {
        "medium" => "in one paragraph",
        "long" => "in a few detailed paragraphs",
        _ => "in two or three sentences",
    };
    format!("Summarize the following text {}:\n\n{}", guidance, text)
}

#[async_trait]
impl NodeAdapter for AiSummarize {
    fn node_type(&self) -> &str {
        catalog::AI_SUMMARIZE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, AdapterError> {
        let text = ctx.require_str("text")?;
        let length = ctx.field_str("length").unwrap_or("short");

        let response = self
            .client
            .generate(&summary_prompt(text, length), DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE)
            .await?;

        Ok(NodeOutput::new().with_output("summary", response.text.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").transient);
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").transient);
        assert!(!status_error(StatusCode::BAD_REQUEST, "").transient);
        assert!(!status_error(StatusCode::UNAUTHORIZED, "").transient);
    }

    #[test]
    fn error_body_is_kept_as_details() {
        let err = status_error(StatusCode::BAD_REQUEST, "prompt too long");
        assert_eq!(
            err.details,
            Some(serde_json::json!({ "body": "prompt too long" }))
        );
    }

    #[test]
    fn summary_length_shapes_the_prompt() {
        assert!(summary_prompt("abc", "short").contains("two or three sentences"));
        assert!(summary_prompt("abc", "long").contains("detailed paragraphs"));
        assert!(summary_prompt("abc", "long").ends_with("abc"));
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(AiClient::new("http://ai:8000/").base_url(), "http://ai:8000");
    }
}
