//! Error types and handling
//!
//! This module provides the error types shared by the Cadence engine and the
//! hosts that embed it. All errors implement the `CadenceErrorExt` trait which
//! provides operator-facing hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages never include provider API keys or raw model output beyond
//! what is needed to diagnose the failure.

use thiserror::Error;

/// Trait for Cadence error extensions
///
/// This trait provides additional context for errors, including operator-facing
/// hints and recoverability information. All engine errors implement this trait.
pub trait CadenceErrorExt {
    /// Returns a short hint for the operator
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are retried on the actor's next turn. Non-recoverable
    /// errors need configuration or data changes before the actor can progress.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: Persistence collaborator failures
/// - **LLM Provider**: Strategic planning call failures
/// - **Budget**: Daily cost ceiling reached
/// - **Actions**: Validation and execution failures in the action pipeline
///
/// # Examples
///
/// ```
/// use sdk::errors::{CadenceErrorExt, EngineError};
///
/// let error = EngineError::ActorNotFound("a-17".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(!error.is_recoverable());
///
/// let busy = EngineError::Database("database is locked".to_string());
/// assert!(busy.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,

    // Budget errors
    #[error("Daily budget exceeded: ${spent_usd:.4} spent of ${cap_usd:.4}")]
    BudgetExceeded { spent_usd: f64, cap_usd: f64 },

    // Actor errors
    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    // Action pipeline errors
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Action execution failed: {0}")]
    ActionExecution(String),

    // Lifecycle errors
    #[error("Scheduler is shutting down")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl CadenceErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Persistence operation failed. The actor retries next turn",
            Self::LLMProvider(_) => "LLM provider unavailable. Check API keys and network",
            Self::AllProvidersExhausted => {
                "No LLM provider answered. Actors continue on deterministic fallback actions"
            }
            Self::BudgetExceeded { .. } => {
                "Daily LLM budget reached. Raise budget.daily_hard_cap_usd or wait for the next day"
            }
            Self::ActorNotFound(_) => "The actor does not exist in the persistence layer",
            Self::InvalidAction(_) => "The action was rejected by validation",
            Self::ActionExecution(_) => "The action pipeline failed to apply the action",
            Self::Cancelled => "The scheduler is stopping",
            Self::Serialization(_) => "Stored data could not be decoded",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::ActorNotFound(_) | Self::Cancelled => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_error_message() {
        let err = EngineError::BudgetExceeded {
            spent_usd: 5.5,
            cap_usd: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Daily budget exceeded: $5.5000 spent of $5.0000"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: EngineError = parse_err.into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }

    #[test]
    fn test_non_recoverable_errors() {
        assert!(!EngineError::Cancelled.is_recoverable());
        assert!(!EngineError::Config("bad".into()).is_recoverable());
        assert!(EngineError::AllProvidersExhausted.is_recoverable());
    }
}
