//! OpenAI-compatible text-generation client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use pulseox_core::{Error, Result, TextGenerator};

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat-completions base endpoint, e.g. `http://localhost:11434/v1`.
    pub endpoint: String,

    /// Model name.
    pub model: String,

    /// Bearer key, when the provider requires one.
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            timeout_secs: 60,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Completion client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatGenerator {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiCompatGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.endpoint);
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("completion request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "completion provider returned {}",
                response.status()
            )));
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| Error::Upstream(format!("completion response malformed: {e}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Upstream("completion response had no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_strips_trailing_slash() {
        let config = LlmConfig::new("http://localhost:11434/v1/", "qwen3-vl:2b");
        assert_eq!(config.endpoint, "http://localhost:11434/v1");
    }
}
