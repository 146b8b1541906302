//! LLM Router
//!
//! Maps an actor's routing key to the provider/model that serves its planning
//! calls. Precedence, first match wins:
//!
//! 1. forced cheap route (runtime flag)
//! 2. per-actor traffic split to a secondary provider
//! 3. the configured route for the key
//! 4. the `default` route
//!
//! The split is a seeded hash of the actor id, so an actor stays on the same
//! side of the split for as long as the seed and percentage are unchanged.

use crate::config::LLMConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A concrete provider/model pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub provider: String,
    pub model: String,
}

impl Target {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Why the primary target was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteVia {
    CheapRoute,
    Split,
    Route,
    Default,
}

/// Everything the decision client needs to know about where to send a call
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSelection {
    pub primary: Target,
    /// Same-provider model tried once on an empty payload
    pub alternate_model: Option<String>,
    /// Different-provider target for the single cross-provider fallback
    pub fallback: Option<Target>,
    pub via: RouteVia,
}

/// Route resolver over the `[llm]` config section
pub struct LLMRouter {
    config: Arc<LLMConfig>,
}

impl LLMRouter {
    pub fn new(config: Arc<LLMConfig>) -> Self {
        Self { config }
    }

    /// Resolve the targets for one actor's planning call
    ///
    /// Returns `None` only when not even a `default` route exists.
    pub fn select(
        &self,
        actor_id: &str,
        routing_key: &str,
        force_cheap: bool,
    ) -> Option<RouteSelection> {
        let cheap = force_cheap
            .then(|| self.config.cheap_route.as_ref())
            .flatten()
            .and_then(|key| self.config.routes.get(key));

        let (primary, alternate_model, via) = if let Some(route) = cheap {
            (
                Target::new(&route.provider, &route.model),
                route.alternate_model.clone(),
                RouteVia::CheapRoute,
            )
        } else if let Some(split) = self
            .config
            .split
            .as_ref()
            .filter(|s| split_bucket(&s.seed, actor_id) < s.percent as u64)
        {
            (
                Target::new(&split.provider, &split.model),
                None,
                RouteVia::Split,
            )
        } else if let Some(route) = self.config.routes.get(routing_key) {
            (
                Target::new(&route.provider, &route.model),
                route.alternate_model.clone(),
                RouteVia::Route,
            )
        } else {
            let route = self.config.routes.get("default")?;
            (
                Target::new(&route.provider, &route.model),
                route.alternate_model.clone(),
                RouteVia::Default,
            )
        };

        let alternate_model = alternate_model.filter(|m| *m != primary.model);
        let fallback = self.fallback_for(&primary);

        Some(RouteSelection {
            primary,
            alternate_model,
            fallback,
            via,
        })
    }

    /// Cross-provider fallback target, if enabled and distinct from `primary`
    fn fallback_for(&self, primary: &Target) -> Option<Target> {
        if !self.config.fallback_enabled {
            return None;
        }
        let provider = self.config.fallback_provider.as_ref()?;
        if *provider == primary.provider {
            return None;
        }

        let model = self.config.fallback_model.clone().or_else(|| {
            self.config
                .routes
                .values()
                .find(|r| r.provider == *provider)
                .map(|r| r.model.clone())
        })?;

        Some(Target::new(provider, model))
    }
}

/// Stable bucket in 0..100 for an actor under a split seed
pub fn split_bucket(seed: &str, actor_id: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(b":");
    hasher.update(actor_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix) % 100
}
