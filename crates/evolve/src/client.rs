//! Async client for the Ollama chat protocol
//!
//! `POST {endpoint}/api/chat` with `{model, messages, stream:false,
//! options:{temperature}}`, `GET {endpoint}/api/tags` for model
//! discovery. One pooled agent is shared across requests; the blocking
//! transport runs on the tokio blocking pool so every public method is
//! an async function with a request-scoped deadline.
//!
//! Transport failures and 5xx statuses are retried with exponential
//! backoff up to `max_retries`; timeouts, 4xx statuses, and malformed
//! bodies are not.
//!
//! ## Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OLLAMA_HOST` | `http://localhost:11434` | Endpoint base URL |
//! | `OLLAMA_MODEL` | `qwen2.5-coder` | Default model identifier |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default sampling temperature, overridable per request.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the Ollama endpoint
    pub endpoint: String,
    /// Model used when a request names none
    pub default_model: String,
    /// Deadline for a single request
    pub request_timeout: Duration,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: "http://localhost:11434".to_string(),
            default_model: "qwen2.5-coder".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl ClientConfig {
    /// Defaults with endpoint and model overridden from the environment.
    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();
        if let Some(host) = std::env::var("OLLAMA_HOST").ok().filter(|s| !s.is_empty()) {
            config.endpoint = host;
        }
        if let Some(model) = std::env::var("OLLAMA_MODEL").ok().filter(|s| !s.is_empty()) {
            config.default_model = model;
        }
        config
    }

    /// Client settings drawn from a VM configuration's LLM fields.
    pub fn from_vm_config(config: &sovereign_vm::VmConfig) -> Self {
        ClientConfig {
            endpoint: config.llm_endpoint.clone(),
            default_model: config.default_model.clone(),
            request_timeout: config.llm_request_timeout,
            ..ClientConfig::default()
        }
    }
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Deadline exceeded
    Timeout,
    /// Transport-level failure (refused, reset, DNS, bad endpoint)
    Connection(String),
    /// Non-2xx response
    HttpStatus(u16),
    /// Body that is not the expected JSON shape
    Malformed(String),
}

impl ClientError {
    /// Transient failures worth another attempt.
    pub fn retryable(&self) -> bool {
        match self {
            ClientError::Connection(_) => true,
            ClientError::HttpStatus(code) => (500..600).contains(code),
            ClientError::Timeout | ClientError::Malformed(_) => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Connection(msg) => write!(f, "connection error: {}", msg),
            ClientError::HttpStatus(code) => write!(f, "HTTP error: {}", code),
            ClientError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature; [`DEFAULT_TEMPERATURE`] when `None`
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, user_content: impl Into<String>) -> Self {
        ChatRequest {
            model: model.into(),
            messages: vec![Message::user(user_content)],
            temperature: None,
        }
    }

    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(content));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A successful chat completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: WireOptions,
}

#[derive(Serialize)]
struct WireOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct WireResponse {
    model: Option<String>,
    message: WireMessage,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireTags {
    models: Vec<WireTagModel>,
}

#[derive(Deserialize)]
struct WireTagModel {
    name: String,
}

/// HTTP client for one Ollama endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    agent: ureq::Agent,
    config: ClientConfig,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("endpoint", &self.config.endpoint)
            .field("default_model", &self.config.default_model)
            .finish()
    }
}

impl OllamaClient {
    /// Build a client, validating the endpoint URL.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        url::Url::parse(&config.endpoint).map_err(|e| {
            ClientError::Connection(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();
        Ok(OllamaClient { agent, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Chat completion with bounded retries.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let wire = WireRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            options: WireOptions {
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            },
        };
        let body = serde_json::to_string(&wire)
            .map_err(|e| ClientError::Malformed(format!("request encoding: {}", e)))?;
        let url = self.url("/api/chat");

        let text = self.post_with_retries(&url, body).await?;
        let wire: WireResponse = serde_json::from_str(&text)
            .map_err(|e| ClientError::Malformed(format!("chat response: {}", e)))?;
        Ok(ChatResponse {
            content: wire.message.content,
            model: wire.model.unwrap_or_else(|| request.model.clone()),
            tokens_used: wire.eval_count.unwrap_or(0) + wire.prompt_eval_count.unwrap_or(0),
        })
    }

    /// Model identifiers known to the endpoint (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let url = self.url("/api/tags");
        let text = self.get_once(url).await?;
        let tags: WireTags = serde_json::from_str(&text)
            .map_err(|e| ClientError::Malformed(format!("tags response: {}", e)))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// True iff the endpoint answers the model listing.
    pub async fn health(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn post_with_retries(&self, url: &str, body: String) -> Result<String, ClientError> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;
        loop {
            let result = self.post_once(url.to_string(), body.clone()).await;
            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(%err, attempt, "retrying LLM request");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once(&self, url: String, body: String) -> Result<String, ClientError> {
        let agent = self.agent.clone();
        debug!(%url, "POST");
        let work = tokio::task::spawn_blocking(move || {
            match agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(response) => response.into_string().map_err(|e| {
                    ClientError::Connection(format!("failed to read response body: {}", e))
                }),
                Err(err) => Err(classify(err)),
            }
        });
        self.bounded(work).await
    }

    async fn get_once(&self, url: String) -> Result<String, ClientError> {
        let agent = self.agent.clone();
        debug!(%url, "GET");
        let work = tokio::task::spawn_blocking(move || match agent.get(&url).call() {
            Ok(response) => response.into_string().map_err(|e| {
                ClientError::Connection(format!("failed to read response body: {}", e))
            }),
            Err(err) => Err(classify(err)),
        });
        self.bounded(work).await
    }

    async fn bounded(
        &self,
        work: tokio::task::JoinHandle<Result<String, ClientError>>,
    ) -> Result<String, ClientError> {
        match tokio::time::timeout(self.config.request_timeout, work).await {
            Err(_elapsed) => Err(ClientError::Timeout),
            Ok(Err(join_err)) => Err(ClientError::Connection(format!(
                "transport worker failed: {}",
                join_err
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

/// Map a transport error to a client error. Agent-level timeouts
/// surface as transport errors; fold them into `Timeout`.
fn classify(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(code, _) => ClientError::HttpStatus(code),
        ureq::Error::Transport(transport) => {
            let text = transport.to_string();
            if text.to_lowercase().contains("timed out") || text.to_lowercase().contains("timeout")
            {
                ClientError::Timeout
            } else {
                ClientError::Connection(text)
            }
        }
    }
}
