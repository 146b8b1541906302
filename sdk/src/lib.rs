//! Cadence SDK
//!
//! Shared contract between the Cadence scheduler engine and the host process
//! that embeds it: the actor/action vocabulary, the action pipeline trait,
//! and the common error type.

/// Error types and handling
pub mod errors;

/// Action pipeline collaborator trait
pub mod pipeline;

/// Actor, strategy and action types
pub mod types;

// Re-export commonly used types
pub use errors::{CadenceErrorExt, EngineError};
pub use pipeline::{ActionPipeline, ExecutionOutcome, Validation};
pub use types::{
    Action, Actor, ActorStatus, Personality, ProposalType, Resource, Strategy, VoteChoice,
};
