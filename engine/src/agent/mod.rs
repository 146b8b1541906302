//! Per-actor decision logic
//!
//! `evaluator` picks planning vs routine, `routine` and the decision client
//! produce the action, `memory` keeps the autobiographical summary and `core`
//! sequences one turn against the [`state::StateStore`].

pub mod core;
pub mod evaluator;
pub mod memory;
pub mod prompt;
pub mod routine;
pub mod state;

pub use core::{AgentCore, TurnOutcome, TurnSettings};
pub use evaluator::{CheckpointReason, Interrupt, TurnMode};
pub use state::{IntentState, MemoryRecord, StateStore, WorldSnapshot};
