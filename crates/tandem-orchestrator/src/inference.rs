//! The inference-client boundary (spec.md §1 "Explicitly out of scope: the
//! language-model client"). The core only consumes this trait; the opaque
//! local inference server and its chat/streaming protocol live outside the
//! core. Shapes mirror the teacher's provider-agnostic router
//! (`ChatMessage`/`LLMRequest`/`StreamChunk` in `llm_router.rs`).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference server unreachable: {0}")]
    Unreachable(String),
    #[error("required model missing: {0}")]
    ModelMissing(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The only surface the core depends on for language-model access. Actual
/// wire protocol, retries, and connection pooling belong to the
/// implementation, not the core.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Stream a completion token-by-token. The Agent consumes this on a
    /// dedicated task and parses actions incrementally (spec.md §4.2).
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, InferenceError>>, InferenceError>;

    /// Non-streaming convenience used by the Consultation Handler and
    /// Orchestrator schedule/process selection, which need one final string.
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        use futures::StreamExt;
        let mut stream = self.stream_completion(request).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk?.delta);
        }
        Ok(out)
    }

    /// Liveness probe used at startup to verify a bound role is reachable
    /// (spec.md §4.4 "On startup verifies that each declared role is
    /// reachable").
    async fn ping(&self) -> Result<(), InferenceError>;
}

/// HTTP client for a local inference server exposing an OpenAI-style
/// streaming chat endpoint. The protocol itself (NDJSON/SSE framing,
/// endpoint paths) is implementation detail the core does not specify.
pub struct HttpInferenceClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, InferenceError>>, InferenceError> {
        use futures::StreamExt;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::Unreachable(format!(
                "status {}",
                response.status()
            )));
        }

        let byte_stream = response.bytes_stream();
        let chunk_stream = byte_stream.map(|chunk| {
            let bytes = chunk.map_err(|e| InferenceError::Unreachable(e.to_string()))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            serde_json::from_str::<StreamChunk>(text.trim())
                .map_err(|e| InferenceError::Malformed(e.to_string()))
        });

        Ok(chunk_stream.boxed())
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        let url = format!("{}/v1/models", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_set_expected_roles() {
        assert_eq!(ChatMessage::system("hi").role, "system");
        assert_eq!(ChatMessage::user("hi").role, "user");
    }
}
