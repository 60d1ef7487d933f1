use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::TranslationConfig;
use crate::errors::ProviderError;
use crate::language_utils;
use crate::providers::{markers, TranslationClient};

/// Client for OpenAI-compatible chat completion endpoints
pub struct OpenAIClient {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// Base URL, e.g. `https://api.openai.com/v1`
    endpoint: String,
    /// Model name
    model: String,
    /// Sampling temperature
    temperature: f32,
    /// System prompt template
    system_prompt: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// The model to use
    model: String,
    /// The conversation
    messages: Vec<ChatMessage>,
    /// Temperature for generation
    temperature: f32,
}

/// Chat message
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender (system, user, assistant)
    pub role: String,
    /// Message text
    pub content: String,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Completion choices
    pub choices: Vec<ChatChoice>,
}

/// Single completion choice
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// Generated message
    pub message: ChatMessage,
}

impl OpenAIClient {
    /// Create a new client
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            temperature: 0.2,
            system_prompt: String::new(),
        })
    }

    /// Create a client from the translation settings
    pub fn from_config(config: &TranslationConfig) -> Result<Self> {
        let mut client = Self::new(
            config.api_key.clone(),
            config.endpoint.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        client.temperature = config.temperature;
        client.system_prompt = config.system_prompt.clone();
        Ok(client)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn render_system_prompt(&self, source_language: &str, target_language: &str) -> String {
        let name = |code: &str| language_utils::get_language_name(code).unwrap_or_else(|_| code.to_string());
        self.system_prompt
            .replace("{source_language}", &name(source_language))
            .replace("{target_language}", &name(target_language))
    }

    /// Map a transport error onto the provider taxonomy
    fn classify_transport(error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(error.to_string())
        } else if error.is_connect() {
            ProviderError::ConnectionError(error.to_string())
        } else {
            ProviderError::RequestFailed(error.to_string())
        }
    }

    /// Map an unsuccessful HTTP status onto the provider taxonomy
    fn classify_status(status: StatusCode, body: String) -> ProviderError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationError(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::MalformedRequest(body),
            _ => ProviderError::ApiError {
                status_code: status.as_u16(),
                message: body,
            },
        }
    }
}

#[async_trait]
impl TranslationClient for OpenAIClient {
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.render_system_prompt(source_language, target_language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: markers::pack(texts),
                },
            ],
            temperature: self.temperature,
        };

        debug!("Sending {} texts to {}", texts.len(), self.completions_url());

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("OpenAI API error ({}): {}", status, body);
            return Err(Self::classify_status(status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        markers::unpack(&reply, texts.len())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifyStatus_shouldMapAuthAndThrottling() {
        let auth = OpenAIClient::classify_status(StatusCode::UNAUTHORIZED, "no".into());
        let busy = OpenAIClient::classify_status(StatusCode::TOO_MANY_REQUESTS, "busy".into());
        let down = OpenAIClient::classify_status(StatusCode::BAD_GATEWAY, "down".into());
        assert!(!auth.is_retryable());
        assert!(busy.is_retryable());
        assert!(down.is_retryable());
    }

    #[test]
    fn test_renderSystemPrompt_shouldUseLanguageNames() {
        let mut config = TranslationConfig::default();
        config.api_key = "sk-test".into();
        let client = OpenAIClient::from_config(&config).unwrap();
        let prompt = client.render_system_prompt("en", "fr");
        assert!(prompt.contains("English"));
        assert!(prompt.contains("French"));
    }

    #[tokio::test]
    async fn test_translateBatch_withEmptyInput_shouldNotCallServer() {
        let client = OpenAIClient::new("sk", "http://127.0.0.1:9", "m", Duration::from_millis(10)).unwrap();
        assert!(client.translate_batch(&[], "en", "es").await.unwrap().is_empty());
    }
}
