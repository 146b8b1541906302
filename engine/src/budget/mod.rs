//! Budget and usage telemetry
//!
//! The decision client consults a [`BudgetLedger`] before every provider call
//! and reports every attempt to it afterwards. The ledger owns the daily cost
//! ceiling; the scheduler only learns "allowed" or "denied, because ...".
//!
//! [`UsageLedger`] is the SQLite-backed implementation: one `provider_calls`
//! row per attempt, summed per UTC day against the runtime `daily_hard_cap_usd`.
//!
//! [`report_call`] is the fire-and-forget path the decision client uses, so a
//! slow or broken sink never delays or fails a decision.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::runtime::RuntimeConfig;
use crate::db::{from_millis, to_millis};

/// Preflight answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    Denied(String),
}

/// One provider call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub actor_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub success: bool,
    pub fallback_used: bool,
    pub latency_ms: u64,
    /// Failure class for unsuccessful attempts
    pub error_kind: Option<String>,
    pub at: DateTime<Utc>,
}

/// Budget and telemetry collaborator
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// May a call to `provider`/`model` be made right now?
    async fn preflight(&self, provider: &str, model: &str) -> Admission;

    /// Store one attempt
    async fn record(&self, call: &CallRecord) -> Result<()>;
}

/// Report an attempt without waiting for the sink
///
/// The write runs on its own task and is abandoned after `timeout`.
pub fn report_call(ledger: Arc<dyn BudgetLedger>, call: CallRecord, timeout: std::time::Duration) {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, ledger.record(&call)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                provider = %call.provider,
                error = %e,
                "Failed to record provider call"
            ),
            Err(_) => warn!(
                provider = %call.provider,
                timeout_ms = timeout.as_millis() as u64,
                "Recording provider call timed out, dropping record"
            ),
        }
    });
}

/// Start of the UTC day containing `at`
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&midnight)
}

/// SQLite-backed ledger over the `provider_calls` table
pub struct UsageLedger {
    pool: SqlitePool,
    runtime: Arc<RuntimeConfig>,
    clock: SharedClock,
}

impl UsageLedger {
    pub fn new(pool: SqlitePool, runtime: Arc<RuntimeConfig>, clock: SharedClock) -> Self {
        Self {
            pool,
            runtime,
            clock,
        }
    }

    /// USD spent since the start of the current UTC day
    pub async fn spent_today(&self) -> Result<f64> {
        let since = day_start(self.clock.now());
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost_usd), 0.0) AS spent FROM provider_calls WHERE called_at >= ?",
        )
        .bind(to_millis(since))
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum provider spend")?;

        Ok(row.try_get("spent")?)
    }

    /// Calls recorded since `since`, oldest first
    pub async fn calls_since(&self, since: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(
            "SELECT actor_id, provider, model, prompt_tokens, completion_tokens, cost_usd,
                    success, fallback_used, latency_ms, error_kind, called_at
             FROM provider_calls WHERE called_at >= ? ORDER BY id ASC",
        )
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load provider calls")?;

        let mut calls = Vec::with_capacity(rows.len());
        for row in &rows {
            let prompt_tokens: i64 = row.try_get("prompt_tokens")?;
            let completion_tokens: i64 = row.try_get("completion_tokens")?;
            let latency_ms: i64 = row.try_get("latency_ms")?;
            calls.push(CallRecord {
                actor_id: row.try_get("actor_id")?,
                provider: row.try_get("provider")?,
                model: row.try_get("model")?,
                prompt_tokens: prompt_tokens.max(0) as u32,
                completion_tokens: completion_tokens.max(0) as u32,
                cost_usd: row.try_get("cost_usd")?,
                success: row.try_get("success")?,
                fallback_used: row.try_get("fallback_used")?,
                latency_ms: latency_ms.max(0) as u64,
                error_kind: row.try_get("error_kind")?,
                at: from_millis(row.try_get("called_at")?),
            });
        }
        Ok(calls)
    }
}

#[async_trait]
impl BudgetLedger for UsageLedger {
    async fn preflight(&self, provider: &str, model: &str) -> Admission {
        let cap = self.runtime.current().await.daily_hard_cap_usd;

        match self.spent_today().await {
            Ok(spent) if spent >= cap => {
                debug!(provider, model, spent, cap, "Preflight denied");
                Admission::Denied(format!(
                    "daily hard cap reached: ${:.4} spent of ${:.4}",
                    spent, cap
                ))
            }
            Ok(_) => Admission::Allowed,
            Err(e) => {
                // Ledger unreadable: keep deciding rather than stall every actor
                warn!(error = %e, "Budget ledger unavailable, allowing call");
                Admission::Allowed
            }
        }
    }

    async fn record(&self, call: &CallRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_calls (actor_id, provider, model, prompt_tokens, completion_tokens,
                 cost_usd, success, fallback_used, latency_ms, error_kind, called_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&call.actor_id)
        .bind(&call.provider)
        .bind(&call.model)
        .bind(call.prompt_tokens as i64)
        .bind(call.completion_tokens as i64)
        .bind(call.cost_usd)
        .bind(call.success)
        .bind(call.fallback_used)
        .bind(call.latency_ms as i64)
        .bind(&call.error_kind)
        .bind(to_millis(call.at))
        .execute(&self.pool)
        .await
        .context("Failed to record provider call")?;

        Ok(())
    }
}

/// Convenience for status output
pub fn remaining(spent: f64, cap: f64) -> f64 {
    (cap - spent).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::runtime::{StaticSource, Tunables};
    use crate::config::Config;
    use crate::db::Database;
    use chrono::Duration;
    use tempfile::TempDir;

    fn call(cost: f64, at: DateTime<Utc>) -> CallRecord {
        CallRecord {
            actor_id: "a1".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            prompt_tokens: 100,
            completion_tokens: 50,
            cost_usd: cost,
            success: true,
            fallback_used: false,
            latency_ms: 120,
            error_kind: None,
            at,
        }
    }

    async fn ledger(cap: f64) -> (TempDir, UsageLedger, ManualClock, StaticSource) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("b.db")).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
        let mut base: Tunables = Config::default_config().tunables();
        base.daily_hard_cap_usd = cap;
        let source = StaticSource::new();
        let runtime = Arc::new(RuntimeConfig::new(
            base,
            Arc::new(source.clone()),
            std::time::Duration::from_secs(0),
        ));
        let ledger = UsageLedger::new(db.pool().clone(), runtime, Arc::new(clock.clone()));
        (dir, ledger, clock, source)
    }

    #[tokio::test]
    async fn test_preflight_denies_over_cap() {
        let (_dir, ledger, clock, _) = ledger(0.01).await;
        assert_eq!(ledger.preflight("openai", "m").await, Admission::Allowed);

        ledger.record(&call(0.006, clock.now())).await.unwrap();
        assert_eq!(ledger.preflight("openai", "m").await, Admission::Allowed);

        ledger.record(&call(0.006, clock.now())).await.unwrap();
        assert!(matches!(
            ledger.preflight("openai", "m").await,
            Admission::Denied(_)
        ));
    }

    #[tokio::test]
    async fn test_spend_resets_at_utc_midnight() {
        let (_dir, ledger, clock, _) = ledger(0.01).await;
        ledger.record(&call(0.02, clock.now())).await.unwrap();
        assert!(matches!(
            ledger.preflight("openai", "m").await,
            Admission::Denied(_)
        ));

        clock.advance(Duration::hours(13));
        assert_eq!(ledger.spent_today().await.unwrap(), 0.0);
        assert_eq!(ledger.preflight("openai", "m").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn test_runtime_cap_override() {
        let (_dir, ledger, clock, source) = ledger(100.0).await;
        ledger.record(&call(0.5, clock.now())).await.unwrap();
        assert_eq!(ledger.preflight("openai", "m").await, Admission::Allowed);

        source.set("daily_hard_cap_usd", "0.25");
        assert!(matches!(
            ledger.preflight("openai", "m").await,
            Admission::Denied(_)
        ));
    }

    #[tokio::test]
    async fn test_calls_round_trip() {
        let (_dir, ledger, clock, _) = ledger(1.0).await;
        let mut failed = call(0.0, clock.now());
        failed.success = false;
        failed.error_kind = Some("rate_limited".into());
        ledger.record(&failed).await.unwrap();

        let calls = ledger.calls_since(day_start(clock.now())).await.unwrap();
        assert_eq!(calls, vec![failed]);
    }

    #[test]
    fn test_day_start() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap();
        assert_eq!(day_start(at), Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(remaining(3.0, 5.0), 2.0);
        assert_eq!(remaining(6.0, 5.0), 0.0);
    }
}
