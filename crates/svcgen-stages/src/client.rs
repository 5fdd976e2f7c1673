//! Chat-completions client used by every prompt stage.
//!
//! Requests go to an OpenAI-compatible endpoint chosen by model-name
//! prefix. Failed calls are retried with exponential backoff before the
//! last error is returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use svcgen_core::{StageError, TokenUsage};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_message: String,
    /// Caller name for logs
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Claude,
    Gemini,
    OpenAi,
}

impl Provider {
    /// Route by model-name prefix; unknown models go to Claude.
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("gemini") {
            Self::Gemini
        } else if model.starts_with("gpt") {
            Self::OpenAi
        } else {
            Self::Claude
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub claude: Endpoint,
    pub gemini: Endpoint,
    pub openai: Endpoint,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            claude: Endpoint::default(),
            gemini: Endpoint::default(),
            openai: Endpoint::default(),
            timeout_ms: 90_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            temperature: 0.1,
            max_tokens: 8192,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = |prefix: &str| Endpoint {
            url: lookup(&format!("{}_API_URL", prefix)).filter(|v| !v.is_empty()),
            api_key: lookup(&format!("{}_API_KEY", prefix)).filter(|v| !v.is_empty()),
        };
        let mut config = Self {
            claude: endpoint("CLAUDE"),
            gemini: endpoint("GEMINI"),
            openai: endpoint("OPENAI"),
            ..Self::default()
        };
        if let Some(ms) = lookup("API_TIMEOUT_READ").and_then(|v| v.trim().parse().ok()) {
            config.timeout_ms = ms;
        }
        config
    }

    pub fn endpoint(&self, provider: Provider) -> &Endpoint {
        match provider {
            Provider::Claude => &self.claude,
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
        }
    }

    /// Providers with no API key. Only logged; a request to one fails.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.claude.api_key.is_none() {
            missing.push("CLAUDE_API_KEY");
        }
        if self.gemini.api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        missing
    }
}

/// Run `op` up to `max_attempts` times, sleeping `base * 2^attempt`
/// between failures. Returns the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    base: Duration,
    mut op: F,
) -> Result<T, StageError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = base * 2u32.pow(attempt);
                warn!(label, attempt, error = %e, delay_ms = delay.as_millis() as u64, "call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(label, attempt, error = %e, "all attempts failed");
                return Err(e);
            }
        }
    }
}

/// Extract content and usage from a chat-completions response body.
pub fn parse_completion(body: &Value) -> Result<ChatResponse, StageError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(StageError::EmptyResponse);
    }

    let field = |name: &str| {
        body.get("usage")
            .and_then(|u| u.get(name))
            .and_then(Value::as_u64)
    };
    let prompt_tokens = field("prompt_tokens").unwrap_or(0);
    let completion_tokens = field("completion_tokens").unwrap_or(0);
    let total_tokens = field("total_tokens").unwrap_or(prompt_tokens + completion_tokens);

    Ok(ChatResponse {
        content: content.to_string(),
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
    })
}

pub struct HttpChatClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpChatClient {
    pub fn new(config: ClientConfig) -> Result<Self, StageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StageError::Config(e.to_string()))?;
        let missing = config.missing_keys();
        if !missing.is_empty() {
            warn!(missing = ?missing, "api keys not configured");
        }
        Ok(Self { http, config })
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, StageError> {
        let endpoint = self.config.endpoint(Provider::for_model(&request.model));
        let url = endpoint
            .url
            .as_deref()
            .ok_or_else(|| StageError::Config(format!("no api url configured for model {}", request.model)))?;
        let key = endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| StageError::Config(format!("no api key configured for model {}", request.model)))?;

        let body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_message },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await.map_err(|e| self.transport_error(e))?;
        parse_completion(&payload)
    }

    fn transport_error(&self, e: reqwest::Error) -> StageError {
        if e.is_timeout() {
            StageError::Timeout(self.config.timeout_ms)
        } else {
            StageError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StageError> {
        let response = retry_with_backoff(
            &request.label,
            self.config.max_attempts,
            Duration::from_millis(self.config.backoff_base_ms),
            |_| self.send_once(request),
        )
        .await?;
        info!(
            label = %request.label,
            model = %request.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            total_tokens = response.usage.total_tokens,
            "chat completion received"
        );
        Ok(response)
    }
}
