//! Ollama LLM Provider
//!
//! Implements the LLMProvider trait for Ollama, a local model server,
//! typically at http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Cost follows configured rates, which default to zero
//! - Token ceiling passed as `num_predict`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    cost_from_rates, Completion, CompletionRequest, LLMError, LLMProvider, Message, Result,
};
use crate::config::ProviderConfig;

/// Ollama provider
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    config: ProviderConfig,
    timeout: Duration,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: Client::new(),
        }
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        cost_from_rates(
            self.config.input_cost_per_1k,
            self.config.output_cost_per_1k,
            prompt_tokens,
            completion_tokens,
        )
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let ollama_messages = self.convert_messages(&request.messages);

        tracing::debug!(
            model = %request.model,
            messages = ollama_messages.len(),
            total_chars = ollama_messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Ollama request"
        );

        let body = OllamaRequest {
            model: request.model.clone(),
            messages: ollama_messages,
            stream: false,
            options: OllamaOptions {
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.config.base_url
                    ))
                } else {
                    LLMError::from(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, error_text));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let content = ollama_response
            .message
            .map(|m| m.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LLMError::EmptyResponse);
        }

        Ok(Completion {
            text: content,
            prompt_tokens: ollama_response.prompt_eval_count.unwrap_or(0),
            completion_tokens: ollama_response.eval_count.unwrap_or(0),
            finish_reason: ollama_response.done_reason,
        })
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OllamaProvider {
        OllamaProvider::new(
            ProviderConfig {
                base_url: "http://localhost:11434".to_string(),
                ..Default::default()
            },
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_ollama_provider_properties() {
        let provider = provider();

        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());
        assert_eq!(provider.estimated_cost(1000, 1000), 0.0);
    }

    #[test]
    fn test_message_conversion() {
        let provider = provider();

        let messages = vec![
            Message::system("You are an actor in a small settlement"),
            Message::user("Choose your next action"),
            Message::assistant("{\"action\":\"rest\"}"),
        ];

        let ollama_messages = provider.convert_messages(&messages);

        assert_eq!(ollama_messages.len(), 3);
        assert_eq!(ollama_messages[0].role, "system");
        assert_eq!(ollama_messages[1].role, "user");
        assert_eq!(ollama_messages[2].role, "assistant");
    }
}
