//! Cadence Engine Library
//!
//! Per-actor decision scheduling for multi-agent simulations. Used by the
//! `cadence` binary and by integration tests.

/// Configuration management module
pub mod config;

/// Injectable time source
pub mod clock;

/// Injection detection module
pub mod injection_detector;

/// Database persistence module
pub mod db;

/// Rate limiting module
pub mod rate_limiter;

/// Spend tracking and call telemetry
pub mod budget;

/// LLM provider abstraction layer
pub mod llm;

/// Per-actor turn logic
pub mod agent;

/// Actor loop supervision
pub mod supervisor;

/// Structural action pipeline
pub mod pipeline;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
