//! Runtime tunables
//!
//! Operators change a handful of values while the scheduler runs: the pause
//! flag, checkpoint interval bounds, memory cadence, the budget cap. These are
//! read from a [`RuntimeSource`] (a key/value table) and overlaid on the
//! baseline from `config.toml`.
//!
//! [`RuntimeConfig`] caches the overlaid result for a short TTL. When the
//! source fails, the last-known values keep being served.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound for every interval setting (30 days)
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Keys understood by [`Tunables::overlay`]
pub const TUNABLE_KEYS: &[&str] = &[
    "paused",
    "active",
    "force_cheap_route",
    "turn_interval_secs",
    "checkpoint_min_secs",
    "checkpoint_max_secs",
    "checkpoint_jitter_secs",
    "interrupt_cooldown_secs",
    "memory_cadence",
    "memory_max_chars",
    "max_output_tokens",
    "daily_hard_cap_usd",
];

/// Effective values of every runtime-adjustable setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    /// Loops idle without consuming a turn while set
    pub paused: bool,
    /// New loops are only started while set
    pub active: bool,
    pub turn_interval_secs: u64,
    pub checkpoint_min_secs: u64,
    pub checkpoint_max_secs: u64,
    pub checkpoint_jitter_secs: u64,
    pub interrupt_cooldown_secs: u64,
    pub memory_cadence: u64,
    pub memory_max_chars: usize,
    pub max_output_tokens: u32,
    pub daily_hard_cap_usd: f64,
    pub force_cheap_route: bool,
}

impl Tunables {
    /// Apply string overrides on top of these values
    ///
    /// Unknown keys are skipped. Values that fail to parse are logged and
    /// leave the baseline untouched.
    pub fn overlay(&self, values: &HashMap<String, String>) -> Tunables {
        let mut out = self.clone();

        for (key, raw) in values {
            let raw = raw.trim();
            let applied = match key.as_str() {
                "paused" => parse_flag(raw).map(|v| out.paused = v),
                "active" => parse_flag(raw).map(|v| out.active = v),
                "force_cheap_route" => parse_flag(raw).map(|v| out.force_cheap_route = v),
                "turn_interval_secs" => interval(raw, 1).map(|v| out.turn_interval_secs = v),
                "checkpoint_min_secs" => interval(raw, 1).map(|v| out.checkpoint_min_secs = v),
                "checkpoint_max_secs" => interval(raw, 1).map(|v| out.checkpoint_max_secs = v),
                "checkpoint_jitter_secs" => interval(raw, 0).map(|v| out.checkpoint_jitter_secs = v),
                "interrupt_cooldown_secs" => {
                    interval(raw, 0).map(|v| out.interrupt_cooldown_secs = v)
                }
                "memory_cadence" => positive(raw).map(|v| out.memory_cadence = v),
                "memory_max_chars" => positive(raw).map(|v| out.memory_max_chars = v as usize),
                "max_output_tokens" => positive(raw).map(|v| out.max_output_tokens = v as u32),
                "daily_hard_cap_usd" => raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| out.daily_hard_cap_usd = v),
                _ => {
                    debug!(key = %key, "Ignoring unknown runtime setting");
                    Some(())
                }
            };

            if applied.is_none() {
                warn!(key = %key, value = %raw, "Ignoring unparseable runtime setting");
            }
        }

        // Keep the interval bounds ordered even if only one side was overridden
        if out.checkpoint_min_secs > out.checkpoint_max_secs {
            warn!(
                min = out.checkpoint_min_secs,
                max = out.checkpoint_max_secs,
                "Runtime checkpoint bounds inverted, clamping max to min"
            );
            out.checkpoint_max_secs = out.checkpoint_min_secs;
        }

        out
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn positive(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|v| *v > 0)
}

/// Seconds in `[min, MAX_INTERVAL_SECS]`
fn interval(raw: &str, min: u64) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|v| (min..=MAX_INTERVAL_SECS).contains(v))
}

/// Authoritative key/value store for runtime settings
#[async_trait]
pub trait RuntimeSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<HashMap<String, String>>;
}

/// In-memory source, used when no database is attached and in tests
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}

#[async_trait]
impl RuntimeSource for StaticSource {
    async fn fetch(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.values.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

struct CacheState {
    current: Tunables,
    fetched_at: Option<Instant>,
}

/// TTL cache of the effective tunables
pub struct RuntimeConfig {
    baseline: Tunables,
    source: Arc<dyn RuntimeSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl RuntimeConfig {
    pub fn new(baseline: Tunables, source: Arc<dyn RuntimeSource>, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                current: baseline.clone(),
                fetched_at: None,
            }),
            baseline,
            source,
            ttl,
        }
    }

    /// Cache with no backing store; always serves the baseline
    pub fn fixed(baseline: Tunables) -> Self {
        Self::new(baseline, Arc::new(StaticSource::new()), Duration::from_secs(3600))
    }

    /// Current tunables, refreshing if the cached copy is older than the TTL
    pub async fn current(&self) -> Tunables {
        let mut state = self.state.lock().await;
        let fresh = state
            .fetched_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false);

        if !fresh {
            self.reload(&mut state).await;
        }

        state.current.clone()
    }

    /// Force a fetch from the source regardless of TTL
    pub async fn refresh(&self) -> Tunables {
        let mut state = self.state.lock().await;
        self.reload(&mut state).await;
        state.current.clone()
    }

    async fn reload(&self, state: &mut CacheState) {
        match self.source.fetch().await {
            Ok(values) => {
                state.current = self.baseline.overlay(&values);
            }
            Err(e) => {
                warn!(error = %e, "Runtime settings unavailable, serving last-known values");
            }
        }
        // Failed fetches also wait a full TTL before retrying
        state.fetched_at = Some(Instant::now());
    }
}
