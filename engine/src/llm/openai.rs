//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com and any server speaking the same
//! `/chat/completions` dialect.

use super::{
    api_key_from_env, cost_from_rates, Completion, CompletionRequest, LLMError, LLMProvider,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct OpenAIProvider {
    config: ProviderConfig,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn estimated_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        cost_from_rates(
            self.config.input_cost_per_1k,
            self.config.output_cost_per_1k,
            prompt_tokens,
            completion_tokens,
        )
    }

    async fn check_health(&self) -> bool {
        api_key_from_env("openai", self.config.api_key_env.as_deref()).is_ok()
    }

    async fn complete(&self, request: &CompletionRequest) -> super::Result<Completion> {
        let api_key = api_key_from_env("openai", self.config.api_key_env.as_deref())?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let api_messages: Vec<_> = request
            .messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or(LLMError::EmptyResponse)?;

        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LLMError::EmptyResponse);
        }

        let usage = data.get("usage");
        let tokens = |key: &str| {
            usage
                .and_then(|u| u.get(key))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32
        };

        Ok(Completion {
            text: text.to_string(),
            prompt_tokens: tokens("prompt_tokens"),
            completion_tokens: tokens("completion_tokens"),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(String::from),
        })
    }
}
