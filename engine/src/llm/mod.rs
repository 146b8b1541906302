//! LLM Provider Abstraction Layer
//!
//! Common interface over the planning providers (OpenAI-compatible, Anthropic,
//! Ollama). The [`LLMProvider`] trait is the contract every provider
//! implements; the [`client::DecisionClient`] drives it through routing,
//! admission control, rate shaping and the retry/fallback policy.
//!
//! Provider failures are classified into a small [`FailureKind`] set. The
//! retry/fallback policy only ever looks at that classification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod anthropic;
pub mod client;
pub mod ollama;
pub mod openai;
pub mod parser;
pub mod policy;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Billing error: {0}")]
    Billing(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Coarse failure classes the retry/fallback policy is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Billing,
    EmptyPayload,
    Transient,
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Billing => "billing",
            FailureKind::EmptyPayload => "empty_payload",
            FailureKind::Transient => "transient",
            FailureKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const BILLING_MARKERS: [&str; 5] = ["billing", "credit", "quota", "payment", "insufficient_funds"];

impl LLMError {
    /// Classify this error for the retry/fallback policy
    pub fn kind(&self) -> FailureKind {
        match self {
            LLMError::RateLimitExceeded => FailureKind::RateLimited,
            LLMError::Billing(_) => FailureKind::Billing,
            LLMError::EmptyResponse => FailureKind::EmptyPayload,
            LLMError::ProviderUnavailable(_)
            | LLMError::ServerError { .. }
            | LLMError::NetworkError(_)
            | LLMError::Timeout
            | LLMError::ParseError(_) => FailureKind::Transient,
            LLMError::NotConfigured(_)
            | LLMError::AuthenticationFailed(_)
            | LLMError::InvalidRequest(_) => FailureKind::Fatal,
        }
    }

    /// Map a non-success HTTP response to an error
    pub fn from_status(status: u16, body: String) -> Self {
        let lowered = body.to_ascii_lowercase();
        let mentions_billing = BILLING_MARKERS.iter().any(|m| lowered.contains(m));

        match status {
            402 => LLMError::Billing(body),
            // OpenAI reports exhausted credit as 429 insufficient_quota
            400..=499 if mentions_billing => LLMError::Billing(body),
            429 => LLMError::RateLimitExceeded,
            401 | 403 => LLMError::AuthenticationFailed(body),
            408 => LLMError::Timeout,
            500..=599 => LLMError::ServerError { status, body },
            _ => LLMError::InvalidRequest(body),
        }
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(e.to_string())
        } else if e.is_decode() {
            LLMError::ParseError(e.to_string())
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }
}

/// One message of a planning request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A single completion request against one model
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// Text and usage returned by a provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Provider stop reason ("stop", "length", "end_turn", ...)
    pub finish_reason: Option<String>,
}

impl Completion {
    /// True when the provider stopped because it hit the token ceiling
    pub fn hit_token_limit(&self) -> bool {
        matches!(
            self.finish_reason.as_deref(),
            Some("length") | Some("max_tokens")
        )
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai", "anthropic")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Estimated USD cost of a call with the given token counts
    fn estimated_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64;

    /// Run one completion
    ///
    /// A 200 response without usable text is reported as
    /// [`LLMError::EmptyResponse`], never as an empty `Completion`.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Price a call from per-1K token rates
pub(crate) fn cost_from_rates(
    input_per_1k: f64,
    output_per_1k: f64,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> f64 {
    (prompt_tokens as f64 / 1000.0) * input_per_1k
        + (completion_tokens as f64 / 1000.0) * output_per_1k
}

/// Read the API key named by `api_key_env`, if any
pub(crate) fn api_key_from_env(provider: &str, env_var: Option<&str>) -> Result<Option<String>> {
    let Some(var) = env_var else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        _ => Err(LLMError::AuthenticationFailed(format!(
            "{} API key not set (expected in ${})",
            provider, var
        ))),
    }
}
