//! Action pipeline contract
//!
//! The scheduler treats action payloads opaquely. Whatever an action "means"
//! in the simulated world is decided by the host through this trait: the
//! scheduler always calls `validate` before `execute`.

use crate::errors::EngineError;
use crate::types::{Action, Actor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of validating an action against the current world
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    /// The action may be executed
    pub fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// The action must not be executed
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// What executing an action did
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    /// Short human-readable description, reused in memory entries
    pub description: String,

    /// Host-defined effects payload
    #[serde(default)]
    pub effects: serde_json::Value,
}

impl ExecutionOutcome {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            effects: serde_json::Value::Null,
        }
    }

    pub fn with_effects(mut self, effects: serde_json::Value) -> Self {
        self.effects = effects;
        self
    }
}

/// Host-provided validation and execution of actor actions
#[async_trait]
pub trait ActionPipeline: Send + Sync {
    /// Check whether `action` is currently legal for `actor`
    async fn validate(&self, actor: &Actor, action: &Action) -> Result<Validation, EngineError>;

    /// Apply a previously validated action
    async fn execute(&self, actor: &Actor, action: &Action)
        -> Result<ExecutionOutcome, EngineError>;
}
