/// Intent state and memory record persistence
use anyhow::{Context, Result};
use sdk::types::Strategy;
use sqlx::sqlite::Sqlite;
use sqlx::{Executor, Row, SqlitePool};

use super::{from_millis, to_millis};
use crate::agent::state::{CheckpointTimestamps, IntentState, MemoryRecord};

pub async fn get_intent(pool: &SqlitePool, actor_id: &str) -> Result<Option<IntentState>> {
    let row = sqlx::query(
        "SELECT strategy, seed_action, checkpoint_number, checkpoint_reason, updated_at,
                last_checkpoint_at, next_checkpoint_at, intent_expires_at
         FROM intent_states WHERE actor_id = ?",
    )
    .bind(actor_id)
    .fetch_optional(pool)
    .await
    .context("Failed to load intent state")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let strategy: String = row.try_get("strategy")?;
    let seed_action: String = row.try_get("seed_action")?;
    let checkpoint_number: i64 = row.try_get("checkpoint_number")?;
    let next_checkpoint_at: Option<i64> = row.try_get("next_checkpoint_at")?;

    Ok(Some(IntentState {
        strategy: Strategy::from_tag(&strategy),
        seed_action: serde_json::from_str(&seed_action)
            .context("Stored seed action is not valid JSON")?,
        checkpoint_number: checkpoint_number.max(0) as u64,
        checkpoint_reason: row.try_get("checkpoint_reason")?,
        updated_at: from_millis(row.try_get("updated_at")?),
        timestamps: CheckpointTimestamps {
            last_checkpoint_at: from_millis(row.try_get("last_checkpoint_at")?),
            next_checkpoint_at: next_checkpoint_at.map(from_millis),
            intent_expires_at: from_millis(row.try_get("intent_expires_at")?),
        },
    }))
}

/// Replace an actor's intent state
///
/// The stored checkpoint number is never lowered: a write carrying a smaller
/// number than what is stored keeps the stored number.
pub async fn upsert_intent<'e, E>(executor: E, actor_id: &str, intent: &IntentState) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let seed = serde_json::to_string(&intent.seed_action)?;
    sqlx::query(
        "INSERT INTO intent_states (actor_id, strategy, seed_action, checkpoint_number,
             checkpoint_reason, updated_at, last_checkpoint_at, next_checkpoint_at, intent_expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(actor_id) DO UPDATE SET
             strategy = excluded.strategy,
             seed_action = excluded.seed_action,
             checkpoint_number = MAX(intent_states.checkpoint_number, excluded.checkpoint_number),
             checkpoint_reason = excluded.checkpoint_reason,
             updated_at = excluded.updated_at,
             last_checkpoint_at = excluded.last_checkpoint_at,
             next_checkpoint_at = excluded.next_checkpoint_at,
             intent_expires_at = excluded.intent_expires_at",
    )
    .bind(actor_id)
    .bind(intent.strategy.as_str())
    .bind(seed)
    .bind(intent.checkpoint_number as i64)
    .bind(&intent.checkpoint_reason)
    .bind(to_millis(intent.updated_at))
    .bind(to_millis(intent.timestamps.last_checkpoint_at))
    .bind(intent.timestamps.next_checkpoint_at.map(to_millis))
    .bind(to_millis(intent.timestamps.intent_expires_at))
    .execute(executor)
    .await
    .context("Failed to store intent state")?;

    Ok(())
}

pub async fn get_memory(pool: &SqlitePool, actor_id: &str) -> Result<Option<MemoryRecord>> {
    let row = sqlx::query(
        "SELECT summary, last_checkpoint_compacted, updated_at FROM memory_records WHERE actor_id = ?",
    )
    .bind(actor_id)
    .fetch_optional(pool)
    .await
    .context("Failed to load memory record")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let compacted: i64 = row.try_get("last_checkpoint_compacted")?;
    Ok(Some(MemoryRecord {
        summary: row.try_get("summary")?,
        last_checkpoint_compacted: compacted.max(0) as u64,
        updated_at: from_millis(row.try_get("updated_at")?),
    }))
}

pub async fn upsert_memory<'e, E>(executor: E, actor_id: &str, memory: &MemoryRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO memory_records (actor_id, summary, last_checkpoint_compacted, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(actor_id) DO UPDATE SET
             summary = excluded.summary,
             last_checkpoint_compacted = excluded.last_checkpoint_compacted,
             updated_at = excluded.updated_at",
    )
    .bind(actor_id)
    .bind(&memory.summary)
    .bind(memory.last_checkpoint_compacted as i64)
    .bind(to_millis(memory.updated_at))
    .execute(executor)
    .await
    .context("Failed to store memory record")?;

    Ok(())
}
