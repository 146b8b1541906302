//! Command handlers for CLI operations
//!
//! - run: start one loop per active actor and keep them going until a signal
//! - status: actor table with checkpoint and memory state
//! - config: effective configuration
//! - tune: write a runtime tunable into the settings table

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::{AgentCore, StateStore, TurnSettings};
use crate::budget::UsageLedger;
use crate::clock::{SharedClock, SystemClock};
use crate::config::runtime::{RuntimeConfig, TUNABLE_KEYS};
use crate::config::Config;
use crate::db::Database;
use crate::llm::client::DecisionClient;
use crate::pipeline::StructuralPipeline;
use crate::rate_limiter::RateLimiter;
use crate::supervisor::{Supervisor, SupervisorSettings};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_database(config: &Config) -> Result<Database> {
    let path = config.database_path();
    Database::new(&path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Run the scheduler until Ctrl+C or SIGTERM
///
/// Active actors found at startup get a loop immediately; the store is
/// rescanned every `rescan_secs` for actors activated later.
pub async fn handle_run(config: &Config, rescan_secs: u64) -> Result<()> {
    let database = open_database(config).await?;
    let clock: SharedClock = Arc::new(SystemClock);

    let runtime = Arc::new(RuntimeConfig::new(
        config.tunables(),
        Arc::new(database.settings()),
        Duration::from_secs(config.runtime.ttl_secs),
    ));
    let limiter = Arc::new(RateLimiter::from_config(&config.llm));
    let ledger = Arc::new(UsageLedger::new(
        database.pool().clone(),
        runtime.clone(),
        clock.clone(),
    ));
    let client = DecisionClient::from_config(config, limiter, ledger, clock.clone());
    let pipeline = StructuralPipeline::new(database.pool().clone(), clock.clone());

    let core = AgentCore::new(
        Arc::new(database.clone()),
        Arc::new(pipeline),
        Arc::new(client),
        runtime.clone(),
        clock,
        TurnSettings::from_config(&config.scheduler, &config.memory),
    )
    .context("Failed to build agent core")?;

    let supervisor = Supervisor::new(
        Arc::new(core),
        runtime,
        SupervisorSettings::from_config(&config.scheduler),
    );

    let started = supervisor.start_all().await.context("Failed to list actors")?;
    info!(started, "Scheduler running");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut rescan = (rescan_secs > 0).then(|| {
        let period = Duration::from_secs(rescan_secs);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = async {
                match rescan.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Err(e) = supervisor.start_all().await {
                    warn!(error = %format!("{:#}", e), "Actor rescan failed");
                }
            }
        }
    }

    supervisor.stop().await;
    if let Err(e) = database.flush_wal().await {
        warn!(error = %format!("{:#}", e), "WAL checkpoint on shutdown failed");
    }
    info!("Scheduler stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
        _ = term.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C");
}

/// Show every actor with its checkpoint and memory state
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let actors = database.list_actors().await.context("Failed to list actors")?;

    let mut rows = Vec::with_capacity(actors.len());
    for actor in &actors {
        let intent = database.load_intent(&actor.id).await?;
        let memory = database.load_memory(&actor.id).await?;
        rows.push((actor, intent, memory));
    }

    match format {
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No actors registered");
                return Ok(());
            }
            println!(
                "{:<16} {:<8} {:>5} {:<22} {:<18} {:>7}",
                "ACTOR", "STATUS", "CKPT", "STRATEGY", "NEXT CHECKPOINT", "MEMORY"
            );
            for (actor, intent, memory) in &rows {
                let (number, strategy, next) = match intent {
                    Some(i) => (
                        i.checkpoint_number.to_string(),
                        i.strategy.to_string(),
                        i.timestamps
                            .next_checkpoint_at
                            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    None => ("-".to_string(), "-".to_string(), "-".to_string()),
                };
                let memory_len = memory.as_ref().map(|m| m.summary.chars().count()).unwrap_or(0);
                println!(
                    "{:<16} {:<8} {:>5} {:<22} {:<18} {:>7}",
                    actor.id, actor.status, number, strategy, next, memory_len
                );
            }
        }
        OutputFormat::Json => {
            let actors: Vec<_> = rows
                .iter()
                .map(|(actor, intent, memory)| {
                    json!({
                        "id": actor.id,
                        "name": actor.name,
                        "status": actor.status.as_str(),
                        "checkpoint_number": intent.as_ref().map(|i| i.checkpoint_number),
                        "strategy": intent.as_ref().map(|i| i.strategy.as_str().to_string()),
                        "next_checkpoint_at": intent
                            .as_ref()
                            .and_then(|i| i.timestamps.next_checkpoint_at)
                            .map(|at| at.to_rfc3339()),
                        "memory_chars": memory.as_ref().map(|m| m.summary.chars().count()),
                    })
                })
                .collect();
            let output = json!({ "actors": actors, "count": actors.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print the effective configuration
pub fn handle_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Set or clear one runtime tunable
///
/// Running schedulers pick the change up within the runtime cache TTL.
pub async fn handle_tune(config: &Config, key: &str, value: Option<&str>) -> Result<()> {
    if !TUNABLE_KEYS.contains(&key) {
        bail!(
            "Unknown tunable '{}'. Known keys: {}",
            key,
            TUNABLE_KEYS.join(", ")
        );
    }

    let database = open_database(config).await?;
    let settings = database.settings();
    match value {
        Some(value) => {
            settings.set(key, value).await?;
            println!("{} = {}", key, value);
        }
        None => {
            settings.remove(key).await?;
            println!("{} cleared, using config.toml value", key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime::RuntimeSource;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default_config();
        config.core.data_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_tune_writes_and_clears_setting() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        handle_tune(&config, "paused", Some("true")).await.unwrap();
        let db = Database::new(&config.database_path()).await.unwrap();
        let values = db.settings().fetch().await.unwrap();
        assert_eq!(values.get("paused").map(String::as_str), Some("true"));

        handle_tune(&config, "paused", None).await.unwrap();
        let values = db.settings().fetch().await.unwrap();
        assert!(!values.contains_key("paused"));
    }

    #[tokio::test]
    async fn test_tune_rejects_unknown_key() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let err = handle_tune(&config, "speed", Some("fast")).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tunable 'speed'"));
    }

    #[tokio::test]
    async fn test_status_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        handle_status(&config, OutputFormat::Json).await.unwrap();
    }
}
