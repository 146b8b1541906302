use super::{
    api_key_from_env, cost_from_rates, Completion, CompletionRequest, LLMError, LLMProvider,
    MessageRole,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    config: ProviderConfig,
    timeout: Duration,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        api_key_from_env("anthropic", self.config.api_key_env.as_deref()).is_ok()
    }

    async fn complete(&self, request: &CompletionRequest) -> super::Result<Completion> {
        let api_key = api_key_from_env("anthropic", self.config.api_key_env.as_deref())?;

        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));

        // System prompt travels outside the message list
        let mut system_prompt = String::new();
        let mut api_messages = Vec::new();
        for msg in &request.messages {
            if msg.role == MessageRole::System {
                system_prompt.push_str(&msg.content);
                system_prompt.push('\n');
                continue;
            }
            api_messages.push(json!({
                "role": if msg.role == MessageRole::Assistant { "assistant" } else { "user" },
                "content": msg.content
            }));
        }

        let payload = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": system_prompt.trim_end(),
            "messages": api_messages,
        });

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            // 529 is Anthropic's "overloaded"
            return Err(LLMError::from_status(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let mut full_content = String::new();
        if let Some(content_arr) = data.get("content").and_then(|c| c.as_array()) {
            for item in content_arr {
                if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    full_content.push_str(text);
                }
            }
        }

        if full_content.trim().is_empty() {
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
            text: full_content,
            prompt_tokens: tokens("input_tokens"),
            completion_tokens: tokens("output_tokens"),
            finish_reason: data
                .get("stop_reason")
                .and_then(|s| s.as_str())
                .map(String::from),
        })
    }
}
