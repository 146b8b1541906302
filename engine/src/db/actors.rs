/// Actor and resource persistence
///
/// All queries are parameterized.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sdk::types::{Actor, ActorStatus, Personality};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, Row, SqlitePool};

use super::{from_millis, to_millis};
use crate::agent::state::ResourceLevels;

const ACTOR_COLUMNS: &str = "id, name, status, model_route, personality, last_active_at";

fn row_to_actor(row: &SqliteRow) -> Result<Actor> {
    let status: String = row.try_get("status")?;
    let personality: String = row.try_get("personality")?;
    let last_active_at: Option<i64> = row.try_get("last_active_at")?;

    Ok(Actor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: ActorStatus::from_tag(&status)
            .ok_or_else(|| anyhow!("Unknown actor status '{}'", status))?,
        model_route: row.try_get("model_route")?,
        personality: Personality::from_tag(&personality),
        last_active_at: last_active_at.map(from_millis),
    })
}

pub async fn insert_actor(pool: &SqlitePool, actor: &Actor) -> Result<()> {
    let now = to_millis(Utc::now());
    sqlx::query(
        "INSERT INTO actors (id, name, status, model_route, personality, created_at, last_active_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&actor.id)
    .bind(&actor.name)
    .bind(actor.status.as_str())
    .bind(&actor.model_route)
    .bind(actor.personality.as_str())
    .bind(now)
    .bind(actor.last_active_at.map(to_millis))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert actor {}", actor.id))?;

    Ok(())
}

pub async fn get_actor(pool: &SqlitePool, actor_id: &str) -> Result<Option<Actor>> {
    let row = sqlx::query(&format!("SELECT {} FROM actors WHERE id = ?", ACTOR_COLUMNS))
        .bind(actor_id)
        .fetch_optional(pool)
        .await
        .context("Failed to load actor")?;

    row.as_ref().map(row_to_actor).transpose()
}

pub async fn list_actors(pool: &SqlitePool) -> Result<Vec<Actor>> {
    let rows = sqlx::query(&format!("SELECT {} FROM actors ORDER BY id", ACTOR_COLUMNS))
        .fetch_all(pool)
        .await
        .context("Failed to list actors")?;

    rows.iter().map(row_to_actor).collect()
}

pub async fn set_status(pool: &SqlitePool, actor_id: &str, status: ActorStatus) -> Result<()> {
    let result = sqlx::query("UPDATE actors SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(actor_id)
        .execute(pool)
        .await
        .context("Failed to update actor status")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("Actor not found: {}", actor_id));
    }
    Ok(())
}

pub async fn touch_last_active<'e, E>(executor: E, actor_id: &str, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE actors SET last_active_at = ? WHERE id = ?")
        .bind(to_millis(at))
        .bind(actor_id)
        .execute(executor)
        .await
        .context("Failed to update last-active timestamp")?;
    Ok(())
}

pub async fn set_resources(
    pool: &SqlitePool,
    actor_id: &str,
    levels: &ResourceLevels,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO actor_resources (actor_id, food, energy, materials, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(actor_id) DO UPDATE SET
             food = excluded.food,
             energy = excluded.energy,
             materials = excluded.materials,
             updated_at = excluded.updated_at",
    )
    .bind(actor_id)
    .bind(levels.food)
    .bind(levels.energy)
    .bind(levels.materials)
    .bind(to_millis(at))
    .execute(pool)
    .await
    .context("Failed to store resources")?;

    Ok(())
}

/// Resource levels, or all zeros when the actor has no row yet
pub async fn get_resources(pool: &SqlitePool, actor_id: &str) -> Result<ResourceLevels> {
    let row = sqlx::query("SELECT food, energy, materials FROM actor_resources WHERE actor_id = ?")
        .bind(actor_id)
        .fetch_optional(pool)
        .await
        .context("Failed to load resources")?;

    match row {
        Some(row) => Ok(ResourceLevels {
            food: row.try_get("food")?,
            energy: row.try_get("energy")?,
            materials: row.try_get("materials")?,
        }),
        None => Ok(ResourceLevels {
            food: 0.0,
            energy: 0.0,
            materials: 0.0,
        }),
    }
}
