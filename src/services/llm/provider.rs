//! Chat model providers
//!
//! The router talks to a `ChatModelProvider`; implementations cover any
//! OpenAI-compatible chat completions API (OpenAI, Azure OpenAI, DeepSeek,
//! local gateways) plus a deterministic mock for development and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::LlmError;
use super::types::{LlmPrompt, whitespace_token_count};
use crate::config::LlmConfig;
use crate::utils::truncate_chars;

/// Raw provider output before cost accounting.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[async_trait]
pub trait ChatModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, model: &str, prompt: &LlmPrompt) -> Result<ProviderReply, LlmError>;
}

pub fn provider_from_config(config: &LlmConfig) -> Arc<dyn ChatModelProvider> {
    match config.provider.as_str() {
        "openai" => Arc::new(OpenAiCompatProvider::new(config)),
        _ => Arc::new(MockProvider),
    }
}

// ============================================================================
// Mock provider
// ============================================================================

/// Deterministic offline provider: echoes a truncated summary of the user
/// prompt as JSON. Token counts are whitespace estimates.
pub struct MockProvider;

#[async_trait]
impl ChatModelProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn call(&self, _model: &str, prompt: &LlmPrompt) -> Result<ProviderReply, LlmError> {
        let response = serde_json::json!({
            "summary": truncate_chars(prompt.user.trim(), 300),
            "note": "mock-provider-response",
        });
        let text = response.to_string();
        let prompt_tokens = whitespace_token_count(&format!("{}\n{}", prompt.system, prompt.user));
        let completion_tokens = whitespace_token_count(&text);
        Ok(ProviderReply { text, prompt_tokens, completion_tokens })
    }
}

// ============================================================================
// OpenAI-compatible provider
// ============================================================================

pub struct OpenAiCompatProvider {
    http_client: Client,
    api_base: String,
    api_key: Option<String>,
    timeout_seconds: u64,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            timeout_seconds: config.request_timeout_seconds,
        }
    }
}

#[async_trait]
impl ChatModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn call(&self, model: &str, prompt: &LlmPrompt) -> Result<ProviderReply, LlmError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Provider("API key not configured".to_string()))?;

        let chat_request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: prompt.system.clone() },
                ChatMessage { role: "user".to_string(), content: prompt.user.clone() },
            ],
            temperature: Some(0.0),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        tracing::debug!("Calling model API: {} with model {}", url, model);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.timeout_seconds))
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_seconds)
                } else {
                    LlmError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Provider(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Parse("Empty response from model".to_string()))?;

        let prompt_tokens = chat_response
            .usage
            .as_ref()
            .map(|u| u.prompt_tokens)
            .unwrap_or_else(|| {
                whitespace_token_count(&format!("{}\n{}", prompt.system, prompt.user))
            });
        let completion_tokens = chat_response
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| whitespace_token_count(&text));

        Ok(ProviderReply { text, prompt_tokens, completion_tokens })
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}
