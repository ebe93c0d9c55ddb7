//! Client for the local model runtime (Ollama HTTP API).

use crate::config::RuntimeConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model runtime unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model runtime timed out after {0:?}")]
    Timeout(Duration),
    #[error("Model runtime error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Body of a model-creation call: a new model named `model`, built from `from`
/// with `system` baked in as its system prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateModelRequest {
    pub model: String,
    pub from: String,
    pub system: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn create_model(&self, request: &CreateModelRequest) -> Result<(), RuntimeError>;
    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String, RuntimeError>;
}

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(flatten)]
    request: &'a CreateModelRequest,
    stream: bool,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatTurn,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .error
            .or(body.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> RuntimeError {
        if error.is_timeout() {
            RuntimeError::Timeout(self.timeout)
        } else {
            RuntimeError::Http(error)
        }
    }
}

#[async_trait]
impl ModelRuntime for OllamaClient {
    async fn create_model(&self, request: &CreateModelRequest) -> Result<(), RuntimeError> {
        tracing::debug!("Creating model {} from {}", request.model, request.from);
        self.post(
            "/api/create",
            &CreateBody {
                request,
                stream: false,
            },
        )
        .await?;
        Ok(())
    }

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String, RuntimeError> {
        let response = self
            .post(
                "/api/chat",
                &ChatBody {
                    model,
                    messages: turns,
                    stream: false,
                },
            )
            .await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(body.message.content)
    }
}
