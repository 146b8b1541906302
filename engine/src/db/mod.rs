/// Database module for SQLite persistence
///
/// Reference persistence adapter for the scheduler. It stores actors and their
/// resources, intent states, memory records, the governance tables the world
/// snapshot reads, the append-only event log, provider call records and the
/// runtime settings table. Uses sqlx with WAL mode for concurrent readers.
///
/// The scheduler only sees this through [`StateStore`]; the schema belongs to
/// the adapter.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sdk::types::{Actor, ActorStatus, VoteChoice};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::agent::state::{
    IntentState, LoggedEvent, MemoryRecord, ResourceLevels, StateStore, TurnCommit,
    WorldSnapshot,
};

pub mod actors;
pub mod events;
pub mod intents;
pub mod settings;
pub mod world;

pub use events::EventRow;
pub use settings::SettingsSource;
pub use world::{NewEnforcement, NewProposal};

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// This will:
    /// 1. Create the database file and parent directory if missing
    /// 2. Enable WAL mode
    /// 3. Run migrations
    ///
    /// SQLite replays a leftover WAL on open, so an unclean shutdown needs no
    /// extra recovery step.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Every statement is `IF NOT EXISTS`, so this is safe on every start.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close all connections in the pool
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Database connection closed");
        Ok(())
    }

    // Seeding helpers for hosts and tests

    pub async fn insert_actor(&self, actor: &Actor) -> Result<()> {
        actors::insert_actor(&self.pool, actor).await
    }

    pub async fn set_actor_status(&self, actor_id: &str, status: ActorStatus) -> Result<()> {
        actors::set_status(&self.pool, actor_id, status).await
    }

    pub async fn set_resources(
        &self,
        actor_id: &str,
        levels: ResourceLevels,
        at: DateTime<Utc>,
    ) -> Result<()> {
        actors::set_resources(&self.pool, actor_id, &levels, at).await
    }

    pub async fn insert_proposal(&self, proposal: &NewProposal) -> Result<()> {
        world::insert_proposal(&self.pool, proposal).await
    }

    pub async fn insert_enforcement(&self, enforcement: &NewEnforcement) -> Result<()> {
        world::insert_enforcement(&self.pool, enforcement).await
    }

    pub async fn record_world_event(
        &self,
        kind: &str,
        summary: &str,
        actor_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        world::record_event(&self.pool, kind, summary, actor_id, at).await
    }

    pub async fn record_vote(
        &self,
        subject_id: &str,
        actor_id: &str,
        choice: VoteChoice,
        at: DateTime<Utc>,
    ) -> Result<()> {
        world::record_vote(&self.pool, subject_id, actor_id, choice, at).await
    }

    /// Most recent event log entries for an actor, newest first
    pub async fn recent_events(&self, actor_id: &str, limit: i64) -> Result<Vec<EventRow>> {
        events::recent_for_actor(&self.pool, actor_id, limit).await
    }

    /// Runtime settings backed by this database
    pub fn settings(&self) -> SettingsSource {
        SettingsSource::new(self.pool.clone())
    }
}

#[async_trait]
impl StateStore for Database {
    async fn load_actor(&self, actor_id: &str) -> Result<Option<Actor>> {
        actors::get_actor(&self.pool, actor_id).await
    }

    async fn list_actors(&self) -> Result<Vec<Actor>> {
        actors::list_actors(&self.pool).await
    }

    async fn load_intent(&self, actor_id: &str) -> Result<Option<IntentState>> {
        intents::get_intent(&self.pool, actor_id).await
    }

    async fn load_memory(&self, actor_id: &str) -> Result<Option<MemoryRecord>> {
        intents::get_memory(&self.pool, actor_id).await
    }

    async fn world_snapshot(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<WorldSnapshot> {
        world::snapshot(&self.pool, actor_id, now, lookback).await
    }

    async fn append_event(&self, event: &LoggedEvent) -> Result<()> {
        events::append(&self.pool, event).await
    }

    async fn commit_turn(&self, commit: TurnCommit) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin turn transaction")?;

        for event in &commit.events {
            events::append(&mut *tx, event).await?;
        }
        if let Some(intent) = &commit.intent {
            intents::upsert_intent(&mut *tx, &commit.actor_id, intent).await?;
        }
        if let Some(memory) = &commit.memory {
            intents::upsert_memory(&mut *tx, &commit.actor_id, memory).await?;
        }
        actors::touch_last_active(&mut *tx, &commit.actor_id, commit.at).await?;

        tx.commit()
            .await
            .context("Failed to commit turn transaction")?;

        debug!(
            actor_id = %commit.actor_id,
            events = commit.events.len(),
            intent = commit.intent.is_some(),
            memory = commit.memory.is_some(),
            "Turn committed"
        );
        Ok(())
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::{CheckpointTimestamps, EventKind};
    use sdk::types::{Personality, Strategy};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        (dir, db)
    }

    fn actor(id: &str) -> Actor {
        Actor {
            id: id.to_string(),
            name: format!("Actor {}", id),
            status: ActorStatus::Active,
            model_route: "default".to_string(),
            personality: Personality::Cautious,
            last_active_at: None,
        }
    }

    #[tokio::test]
    async fn test_database_creation_and_migrations() {
        let (dir, db) = open().await;
        assert!(dir.path().join("test.db").exists());

        // Re-running migrations is harmless
        db.run_migrations().await.unwrap();
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let (_dir, db) = open().await;
        db.insert_actor(&actor("a1")).await.unwrap();

        let loaded = db.load_actor("a1").await.unwrap().unwrap();
        assert_eq!(loaded.personality, Personality::Cautious);
        assert_eq!(loaded.status, ActorStatus::Active);
        assert!(db.load_actor("missing").await.unwrap().is_none());

        db.set_actor_status("a1", ActorStatus::Dormant).await.unwrap();
        let loaded = db.load_actor("a1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ActorStatus::Dormant);
    }

    #[tokio::test]
    async fn test_commit_turn_writes_everything() {
        let (_dir, db) = open().await;
        db.insert_actor(&actor("a1")).await.unwrap();
        let now = from_millis(1_700_000_000_000);

        let mut commit = TurnCommit::new("a1", now);
        commit.event(EventKind::Checkpoint, json!({"origin": "checkpoint"}));
        commit.intent = Some(IntentState {
            strategy: Strategy::Governance,
            seed_action: json!({"action": "vote", "proposal_id": "p1"}),
            checkpoint_number: 4,
            checkpoint_reason: "scheduled".to_string(),
            updated_at: now,
            timestamps: CheckpointTimestamps {
                last_checkpoint_at: now,
                next_checkpoint_at: Some(now + Duration::seconds(300)),
                intent_expires_at: now + Duration::seconds(300),
            },
        });
        commit.memory = Some(MemoryRecord {
            summary: "#4 voted".to_string(),
            last_checkpoint_compacted: 4,
            updated_at: now,
        });
        db.commit_turn(commit.clone()).await.unwrap();

        assert_eq!(db.load_intent("a1").await.unwrap(), commit.intent);
        assert_eq!(db.load_memory("a1").await.unwrap(), commit.memory);
        let events = db.recent_events("a1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "checkpoint");

        let loaded = db.load_actor("a1").await.unwrap().unwrap();
        assert_eq!(loaded.last_active_at, Some(now));
    }

    #[test]
    fn test_millis_conversion() {
        let at = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(at), 1_700_000_000_123);
    }
}
