//! OpenAI-compatible chat completion client implementing `ReasoningPort`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use hop_core::{Completion, HopError, Prompt, ProviderConfig, ReasoningPort, Result};

/// Reasoning port backed by a chat completion endpoint.
pub struct ChatReasoner {
    client: Client,
    url: String,
    api_key: String,
    config: ProviderConfig,
}

impl ChatReasoner {
    /// Create a client with an explicit API key.
    pub fn new(config: ProviderConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| HopError::config(format!("Failed to build HTTP client: {}", e)))?;
        let url = format!("{}{}", config.api_base.trim_end_matches('/'), config.path);

        Ok(Self {
            client,
            url,
            api_key: api_key.into(),
            config,
        })
    }

    /// Create a client reading the API key from `config.api_key_env`.
    pub fn from_env(config: ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            HopError::config(format!(
                "Set the {} environment variable to use the chat provider",
                config.api_key_env
            ))
        })?;
        Self::new(config, api_key)
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.role },
                {
                    "role": "user",
                    "content": format!("{}\n\n{}", prompt.context, prompt.instructions),
                },
            ],
        })
    }
}

fn classify_status(status: StatusCode, body: &str) -> HopError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            HopError::unauthenticated(format!("provider returned {}", status))
        }
        _ => HopError::reasoning(format!("provider returned {}: {}", status, body)),
    }
}

fn classify_transport(err: reqwest::Error, timeout_ms: u64) -> HopError {
    if err.is_timeout() {
        HopError::Timeout {
            operation: "chat completion".to_string(),
            timeout_ms,
        }
    } else {
        HopError::reasoning(err.to_string())
    }
}

/// Extract the first choice's message content.
fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(|c| c.to_string())
        .ok_or_else(|| HopError::malformed("chat", "response is missing choices[0].message.content"))
}

#[async_trait]
impl ReasoningPort for ChatReasoner {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        debug!("Chat completion request: mode={}", prompt.mode);

        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| classify_transport(e, self.config.timeout_ms))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let json: Value = res
            .json()
            .await
            .map_err(|e| HopError::malformed(prompt.mode, e.to_string()))?;

        Ok(Completion::new(parse_chat_response(&json)?))
    }
}
