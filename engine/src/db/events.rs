/// Append-only event log
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::Sqlite;
use sqlx::{Executor, Row, SqlitePool};

use super::{from_millis, to_millis};
use crate::agent::state::LoggedEvent;
use chrono::{DateTime, Utc};

/// Stored event log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub actor_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub async fn append<'e, E>(executor: E, event: &LoggedEvent) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&event.payload)?;
    sqlx::query("INSERT INTO event_log (actor_id, kind, payload, created_at) VALUES (?, ?, ?, ?)")
        .bind(&event.actor_id)
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(to_millis(event.at))
        .execute(executor)
        .await
        .with_context(|| format!("Failed to append {} event", event.kind))?;

    Ok(())
}

/// Newest first
pub async fn recent_for_actor(pool: &SqlitePool, actor_id: &str, limit: i64) -> Result<Vec<EventRow>> {
    let rows = sqlx::query(
        "SELECT id, actor_id, kind, payload, created_at FROM event_log
         WHERE actor_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(actor_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to load events")?;

    rows.iter()
        .map(|row| -> Result<EventRow> {
            let payload: String = row.try_get("payload")?;
            Ok(EventRow {
                id: row.try_get("id")?,
                actor_id: row.try_get("actor_id")?,
                kind: row.try_get("kind")?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                created_at: from_millis(row.try_get("created_at")?),
            })
        })
        .collect()
}
