//! Configuration management
//!
//! This module handles loading, validation, and management of the Cadence
//! configuration. Configuration is stored in TOML format at
//! ~/.cadence/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, log format, data directory
//! - **scheduler**: Turn cadence, checkpoint interval bounds, interrupt thresholds
//! - **memory**: Autobiographical memory cap and update cadence
//! - **llm**: Provider routes, fallback, retry and per-provider limits
//! - **budget**: Daily hard cap on provider spend
//! - **runtime**: Refresh interval for runtime tunables
//!
//! Values that operators change while the scheduler runs (pause flag, interval
//! bounds, budget cap, ...) are layered on top of this file by
//! [`runtime::RuntimeConfig`].
//!
//! # Examples
//!
//! ```no_run
//! use cadence_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Checkpoint every {}-{}s", config.scheduler.checkpoint_min_secs, config.scheduler.checkpoint_max_secs);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub mod runtime;

pub use runtime::{RuntimeConfig, RuntimeSource, StaticSource, Tunables};

/// Provider names the engine knows how to build
pub const KNOWN_PROVIDERS: [&str; 3] = ["openai", "anthropic", "ollama"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Per-actor loop and checkpoint settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Memory compaction settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Budget settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Runtime tunables cache settings
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (text, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Loop supervisor and checkpoint evaluator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Base sleep between two turns of one actor
    #[serde(default = "default_turn_interval")]
    pub turn_interval_secs: u64,

    /// Symmetric jitter applied to the turn sleep
    #[serde(default = "default_turn_jitter")]
    pub turn_jitter_secs: u64,

    /// Upper bound of the random delay before an actor's first turn
    #[serde(default = "default_startup_stagger")]
    pub startup_stagger_secs: u64,

    /// How long `stop()` waits for in-flight turns before abandoning them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Lower bound of the interval between scheduled checkpoints
    #[serde(default = "default_checkpoint_min")]
    pub checkpoint_min_secs: u64,

    /// Upper bound of the interval between scheduled checkpoints
    #[serde(default = "default_checkpoint_max")]
    pub checkpoint_max_secs: u64,

    /// Symmetric jitter added to the checkpoint interval
    #[serde(default = "default_checkpoint_jitter")]
    pub checkpoint_jitter_secs: u64,

    /// Interrupts are ignored this long after a checkpoint
    #[serde(default = "default_interrupt_cooldown")]
    pub interrupt_cooldown_secs: u64,

    /// Food or energy below this is a starvation risk
    #[serde(default = "default_survival_threshold")]
    pub survival_threshold: f64,

    /// Unvoted proposals closing within this window trigger a checkpoint
    #[serde(default = "default_proposal_deadline_window")]
    pub proposal_deadline_window_secs: u64,

    /// Unvoted proposals closing within this window get a routine vote
    #[serde(default = "default_urgent_vote_window")]
    pub urgent_vote_window_secs: u64,

    /// Crisis events newer than this trigger a checkpoint
    #[serde(default = "default_crisis_lookback")]
    pub crisis_lookback_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            turn_interval_secs: default_turn_interval(),
            turn_jitter_secs: default_turn_jitter(),
            startup_stagger_secs: default_startup_stagger(),
            shutdown_grace_secs: default_shutdown_grace(),
            checkpoint_min_secs: default_checkpoint_min(),
            checkpoint_max_secs: default_checkpoint_max(),
            checkpoint_jitter_secs: default_checkpoint_jitter(),
            interrupt_cooldown_secs: default_interrupt_cooldown(),
            survival_threshold: default_survival_threshold(),
            proposal_deadline_window_secs: default_proposal_deadline_window(),
            urgent_vote_window_secs: default_urgent_vote_window(),
            crisis_lookback_secs: default_crisis_lookback(),
        }
    }
}

/// Memory compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Character cap of one actor's summary text
    #[serde(default = "default_memory_max_chars")]
    pub max_chars: usize,

    /// Every Nth checkpoint refreshes memory even without salient events
    #[serde(default = "default_memory_cadence")]
    pub cadence: u64,

    /// Outcome descriptions are truncated to this many characters
    #[serde(default = "default_outcome_chars")]
    pub outcome_chars: usize,

    /// Salient event summaries are truncated to this many characters
    #[serde(default = "default_event_chars")]
    pub event_chars: usize,

    /// How far back the salience detector looks for events
    #[serde(default = "default_salience_lookback")]
    pub salience_lookback_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_chars: default_memory_max_chars(),
            cadence: default_memory_cadence(),
            outcome_chars: default_outcome_chars(),
            event_chars: default_event_chars(),
            salience_lookback_secs: default_salience_lookback(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Completion token ceiling for planning requests
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Per-call timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts against the original provider before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Allow one call against `fallback_provider` on rate-limit/billing/empty failures
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Provider used for cross-provider fallback
    #[serde(default)]
    pub fallback_provider: Option<String>,

    /// Model used on the fallback provider (defaults to that provider's `default` route model)
    #[serde(default)]
    pub fallback_model: Option<String>,

    /// Route every actor through `cheap_route`
    #[serde(default)]
    pub force_cheap_route: bool,

    /// Route key used when `force_cheap_route` is on
    #[serde(default)]
    pub cheap_route: Option<String>,

    /// Routing key -> provider/model
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,

    /// Stable per-actor traffic split to a secondary provider
    #[serde(default)]
    pub split: Option<SplitConfig>,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: ProviderConfig,

    /// Anthropic provider settings
    #[serde(default)]
    pub anthropic: ProviderConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: ProviderConfig,
}

impl LLMConfig {
    /// Settings block for a provider name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "openai" => Some(&self.openai),
            "anthropic" => Some(&self.anthropic),
            "ollama" => Some(&self.ollama),
            _ => None,
        }
    }
}

/// One routing key's provider/model pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub provider: String,
    pub model: String,

    /// Same-provider model retried once when the primary returns an empty payload
    #[serde(default)]
    pub alternate_model: Option<String>,
}

/// Deterministic traffic split settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitConfig {
    pub provider: String,
    pub model: String,

    /// Share of actors (0-100) sent to the secondary provider
    pub percent: u8,

    /// Hash seed; changing it reshuffles which actors are split
    #[serde(default = "default_split_seed")]
    pub seed: String,
}

/// Per-provider connection, concurrency and pricing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider API (empty = provider default)
    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Process-wide concurrent request cap
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Requests-per-minute ceiling (sliding 60s window); none = unlimited
    #[serde(default)]
    pub rpm_limit: Option<u32>,

    /// USD per 1K prompt tokens
    #[serde(default)]
    pub input_cost_per_1k: f64,

    /// USD per 1K completion tokens
    #[serde(default)]
    pub output_cost_per_1k: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: None,
            max_concurrency: default_max_concurrency(),
            rpm_limit: None,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }
}

/// Budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Provider spend ceiling per UTC day
    #[serde(default = "default_daily_cap")]
    pub daily_hard_cap_usd: f64,

    /// Telemetry writes slower than this are dropped
    #[serde(default = "default_record_timeout")]
    pub record_timeout_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_hard_cap_usd: default_daily_cap(),
            record_timeout_ms: default_record_timeout(),
        }
    }
}

/// Runtime tunables cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Cached tunables are refreshed after this many seconds
    #[serde(default = "default_runtime_ttl")]
    pub ttl_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_runtime_ttl(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cadence")
}

fn default_turn_interval() -> u64 {
    30
}

fn default_turn_jitter() -> u64 {
    5
}

fn default_startup_stagger() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_checkpoint_min() -> u64 {
    300
}

fn default_checkpoint_max() -> u64 {
    900
}

fn default_checkpoint_jitter() -> u64 {
    60
}

fn default_interrupt_cooldown() -> u64 {
    120
}

fn default_survival_threshold() -> f64 {
    3.0
}

fn default_proposal_deadline_window() -> u64 {
    600
}

fn default_urgent_vote_window() -> u64 {
    300
}

fn default_crisis_lookback() -> u64 {
    900
}

fn default_memory_max_chars() -> usize {
    2000
}

fn default_memory_cadence() -> u64 {
    3
}

fn default_outcome_chars() -> usize {
    160
}

fn default_event_chars() -> usize {
    120
}

fn default_salience_lookback() -> u64 {
    900
}

fn default_max_output_tokens() -> u32 {
    600
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    20_000
}

fn default_split_seed() -> String {
    "cadence".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_daily_cap() -> f64 {
    5.0
}

fn default_record_timeout() -> u64 {
    2000
}

fn default_runtime_ttl() -> u64 {
    5
}

/// Base URL used when a provider block leaves `base_url` empty
pub fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "ollama" => "http://localhost:11434",
        _ => "",
    }
}

impl Config {
    /// Load configuration from the default location (~/.cadence/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Serialize before processing so the file keeps the portable ~ path
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cadence/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".cadence").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert(
            "default".to_string(),
            RouteConfig {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                alternate_model: Some("gpt-4.1-mini".to_string()),
            },
        );
        routes.insert(
            "premium".to_string(),
            RouteConfig {
                provider: "anthropic".to_string(),
                model: "claude-3-5-sonnet-20241022".to_string(),
                alternate_model: Some("claude-3-5-haiku-20241022".to_string()),
            },
        );
        routes.insert(
            "cheap".to_string(),
            RouteConfig {
                provider: "openai".to_string(),
                model: "gpt-4.1-nano".to_string(),
                alternate_model: None,
            },
        );

        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                log_format: default_log_format(),
                data_dir: default_data_dir(),
            },
            scheduler: SchedulerConfig::default(),
            memory: MemoryConfig::default(),
            llm: LLMConfig {
                max_output_tokens: default_max_output_tokens(),
                request_timeout_secs: default_request_timeout(),
                max_attempts: default_max_attempts(),
                backoff_base_ms: default_backoff_base(),
                backoff_max_ms: default_backoff_max(),
                fallback_enabled: true,
                fallback_provider: Some("anthropic".to_string()),
                fallback_model: Some("claude-3-5-haiku-20241022".to_string()),
                force_cheap_route: false,
                cheap_route: Some("cheap".to_string()),
                routes,
                split: None,
                openai: ProviderConfig {
                    base_url: default_base_url("openai").to_string(),
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                    max_concurrency: 8,
                    rpm_limit: None,
                    input_cost_per_1k: 0.00015,
                    output_cost_per_1k: 0.0006,
                },
                anthropic: ProviderConfig {
                    base_url: default_base_url("anthropic").to_string(),
                    api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                    max_concurrency: 4,
                    rpm_limit: Some(50),
                    input_cost_per_1k: 0.003,
                    output_cost_per_1k: 0.015,
                },
                ollama: ProviderConfig {
                    base_url: default_base_url("ollama").to_string(),
                    api_key_env: None,
                    max_concurrency: 2,
                    rpm_limit: None,
                    input_cost_per_1k: 0.0,
                    output_cost_per_1k: 0.0,
                },
            },
            budget: BudgetConfig::default(),
            runtime: RuntimeSettings::default(),
        }
    }

    /// Baseline runtime tunables derived from this file
    pub fn tunables(&self) -> Tunables {
        Tunables {
            paused: false,
            active: true,
            turn_interval_secs: self.scheduler.turn_interval_secs,
            checkpoint_min_secs: self.scheduler.checkpoint_min_secs,
            checkpoint_max_secs: self.scheduler.checkpoint_max_secs,
            checkpoint_jitter_secs: self.scheduler.checkpoint_jitter_secs,
            interrupt_cooldown_secs: self.scheduler.interrupt_cooldown_secs,
            memory_cadence: self.memory.cadence,
            memory_max_chars: self.memory.max_chars,
            max_output_tokens: self.llm.max_output_tokens,
            daily_hard_cap_usd: self.budget.daily_hard_cap_usd,
            force_cheap_route: self.llm.force_cheap_route,
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("cadence.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates log settings, provider names and numeric bounds
    /// - Fills empty provider base URLs
    /// - Expands ~ in the data directory and creates it
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !["text", "json"].contains(&self.core.log_format.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log format '{}'. Must be text or json",
                self.core.log_format
            )));
        }

        // Checkpoint interval bounds
        let s = &self.scheduler;
        if s.checkpoint_min_secs == 0 {
            return Err(EngineError::Config(
                "checkpoint_min_secs must be greater than 0".to_string(),
            ));
        }
        if s.checkpoint_min_secs > s.checkpoint_max_secs {
            return Err(EngineError::Config(format!(
                "checkpoint_min_secs ({}) must not exceed checkpoint_max_secs ({})",
                s.checkpoint_min_secs, s.checkpoint_max_secs
            )));
        }
        let intervals = [
            ("turn_interval_secs", s.turn_interval_secs),
            ("turn_jitter_secs", s.turn_jitter_secs),
            ("startup_stagger_secs", s.startup_stagger_secs),
            ("shutdown_grace_secs", s.shutdown_grace_secs),
            ("checkpoint_min_secs", s.checkpoint_min_secs),
            ("checkpoint_max_secs", s.checkpoint_max_secs),
            ("checkpoint_jitter_secs", s.checkpoint_jitter_secs),
            ("interrupt_cooldown_secs", s.interrupt_cooldown_secs),
            ("proposal_deadline_window_secs", s.proposal_deadline_window_secs),
            ("urgent_vote_window_secs", s.urgent_vote_window_secs),
            ("crisis_lookback_secs", s.crisis_lookback_secs),
            ("salience_lookback_secs", self.memory.salience_lookback_secs),
        ];
        for (name, value) in intervals {
            if value > runtime::MAX_INTERVAL_SECS {
                return Err(EngineError::Config(format!(
                    "{} ({}) must not exceed {} seconds",
                    name,
                    value,
                    runtime::MAX_INTERVAL_SECS
                )));
            }
        }
        if s.turn_interval_secs == 0 {
            return Err(EngineError::Config(
                "turn_interval_secs must be greater than 0".to_string(),
            ));
        }
        if !(s.survival_threshold >= 0.0) {
            return Err(EngineError::Config(
                "survival_threshold must be a non-negative number".to_string(),
            ));
        }

        if self.memory.max_chars == 0 || self.memory.cadence == 0 {
            return Err(EngineError::Config(
                "memory.max_chars and memory.cadence must be greater than 0".to_string(),
            ));
        }

        // Providers and routes
        if !self.llm.routes.contains_key("default") {
            return Err(EngineError::Config(
                "llm.routes must define a 'default' route".to_string(),
            ));
        }
        for (key, route) in &self.llm.routes {
            ensure_known_provider(&route.provider, &format!("llm.routes.{}", key))?;
        }
        if let Some(fallback) = &self.llm.fallback_provider {
            ensure_known_provider(fallback, "llm.fallback_provider")?;
        }
        if let Some(cheap) = &self.llm.cheap_route {
            if !self.llm.routes.contains_key(cheap) {
                return Err(EngineError::Config(format!(
                    "llm.cheap_route '{}' is not a configured route",
                    cheap
                )));
            }
        }
        if let Some(split) = &self.llm.split {
            ensure_known_provider(&split.provider, "llm.split.provider")?;
            if split.percent > 100 {
                return Err(EngineError::Config(
                    "llm.split.percent must be between 0 and 100".to_string(),
                ));
            }
        }
        if self.llm.max_attempts == 0 {
            return Err(EngineError::Config(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }

        for name in KNOWN_PROVIDERS {
            let provider = match name {
                "openai" => &mut self.llm.openai,
                "anthropic" => &mut self.llm.anthropic,
                _ => &mut self.llm.ollama,
            };
            if provider.base_url.trim().is_empty() {
                provider.base_url = default_base_url(name).to_string();
            }
            if provider.max_concurrency == 0 {
                return Err(EngineError::Config(format!(
                    "llm.{}.max_concurrency must be greater than 0",
                    name
                )));
            }
            if provider.rpm_limit == Some(0) {
                return Err(EngineError::Config(format!(
                    "llm.{}.rpm_limit must be greater than 0 when set",
                    name
                )));
            }
        }

        if self.budget.daily_hard_cap_usd < 0.0 {
            return Err(EngineError::Config(
                "budget.daily_hard_cap_usd must not be negative".to_string(),
            ));
        }

        // Expand and create data directory
        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

fn ensure_known_provider(name: &str, field: &str) -> Result<(), EngineError> {
    if KNOWN_PROVIDERS.contains(&name) {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "Invalid provider '{}' in {}. Must be one of: {}",
            name,
            field,
            KNOWN_PROVIDERS.join(", ")
        )))
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.scheduler.checkpoint_min_secs, 300);
        assert_eq!(config.memory.cadence, 3);
        assert!(config.llm.routes.contains_key("default"));
        assert_eq!(config.llm.fallback_provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.routes, deserialized.llm.routes);
    }

    #[test]
    fn test_rejects_inverted_checkpoint_bounds() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir().join("cadence-config-test");
        config.scheduler.checkpoint_min_secs = 1000;
        config.scheduler.checkpoint_max_secs = 10;

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("checkpoint_min_secs"));
    }

    #[test]
    fn test_rejects_intervals_beyond_thirty_days() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir().join("cadence-config-test");
        config.scheduler.checkpoint_min_secs = 10_000_000_000_000_000;
        config.scheduler.checkpoint_max_secs = 10_000_000_000_000_000;

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("checkpoint_min_secs"));

        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir().join("cadence-config-test");
        config.scheduler.interrupt_cooldown_secs = runtime::MAX_INTERVAL_SECS + 1;
        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("interrupt_cooldown_secs"));
    }

    #[test]
    fn test_rejects_unknown_route_provider() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir().join("cadence-config-test");
        config.llm.routes.insert(
            "odd".to_string(),
            RouteConfig {
                provider: "mystery".to_string(),
                model: "m".to_string(),
                alternate_model: None,
            },
        );

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_tunables_mirror_file_values() {
        let config = Config::default_config();
        let tunables = config.tunables();
        assert!(!tunables.paused);
        assert!(tunables.active);
        assert_eq!(tunables.checkpoint_max_secs, 900);
        assert_eq!(tunables.memory_max_chars, 2000);
    }
}
