//! Rate limiting module
//!
//! Process-wide admission control for outbound provider calls. Each provider
//! gets its own lane with two independent limits:
//!
//! - **Concurrency**: a fixed number of in-flight requests (semaphore permits)
//! - **Requests per minute**: an optional sliding 60-second window
//!
//! Both are shared by every actor loop in the process. Callers block until a
//! permit is free and the window has capacity; a short random jitter is added
//! to RPM waits so actors released by the same window edge do not all fire in
//! the same instant.
//!
//! Limits are sized once at startup from `config.toml`.

use rand::Rng;
use sdk::errors::EngineError;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{LLMConfig, KNOWN_PROVIDERS};

const RPM_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Limits for one provider lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_concurrency: usize,
    pub rpm_limit: Option<u32>,
}

/// Held for the duration of one provider call
#[derive(Debug)]
pub struct ProviderPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

struct RpmWindow {
    limit: usize,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RpmWindow {
    /// Claim a slot in the window, returning how long to wait if full
    async fn try_claim(&self) -> Option<Duration> {
        let mut stamps = self.stamps.lock().await;
        let now = Instant::now();

        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= RPM_WINDOW {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() < self.limit {
            stamps.push_back(now);
            return None;
        }

        // Full: wait until the oldest stamp leaves the window
        stamps
            .front()
            .map(|oldest| (*oldest + RPM_WINDOW).saturating_duration_since(now))
    }
}

struct Lane {
    permits: Arc<Semaphore>,
    window: Option<RpmWindow>,
}

/// Per-provider concurrency and RPM limiter
pub struct RateLimiter {
    lanes: HashMap<String, Lane>,
    max_jitter: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a limiter with no lanes; unknown providers are unlimited
    pub fn new() -> Self {
        Self {
            lanes: HashMap::new(),
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Build lanes for every configured provider
    pub fn from_config(config: &LLMConfig) -> Self {
        let mut limiter = Self::new();
        for name in KNOWN_PROVIDERS {
            if let Some(provider) = config.provider(name) {
                limiter.register(
                    name,
                    ProviderLimits {
                        max_concurrency: provider.max_concurrency,
                        rpm_limit: provider.rpm_limit,
                    },
                );
            }
        }
        limiter
    }

    /// Override the upper bound of the random delay added to RPM waits
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Add or replace a provider lane
    pub fn register(&mut self, provider: &str, limits: ProviderLimits) {
        let lane = Lane {
            permits: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
            window: limits.rpm_limit.map(|limit| RpmWindow {
                limit: limit.max(1) as usize,
                stamps: Mutex::new(VecDeque::new()),
            }),
        };
        self.lanes.insert(provider.to_string(), lane);
    }

    /// Wait for a concurrency permit and RPM capacity on `provider`
    ///
    /// The returned permit must be held until the call completes.
    pub async fn acquire(&self, provider: &str) -> Result<ProviderPermit, EngineError> {
        let Some(lane) = self.lanes.get(provider) else {
            return Ok(ProviderPermit { _permit: None });
        };

        let permit = lane
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Cancelled)?;

        if let Some(window) = &lane.window {
            while let Some(wait) = window.try_claim().await {
                let jitter = self.jitter();
                debug!(
                    provider = %provider,
                    wait_ms = (wait + jitter).as_millis() as u64,
                    "RPM window full, waiting"
                );
                tokio::time::sleep(wait + jitter).await;
            }
        }

        Ok(ProviderPermit {
            _permit: Some(permit),
        })
    }

    /// Free concurrency permits on a lane (None for unknown providers)
    pub fn available_permits(&self, provider: &str) -> Option<usize> {
        self.lanes
            .get(provider)
            .map(|lane| lane.permits.available_permits())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
