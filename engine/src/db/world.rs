/// Governance tables, world events and the per-actor world snapshot
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sdk::types::{ProposalType, VoteChoice};
use sqlx::{Row, SqlitePool};

use super::{actors, from_millis, to_millis};
use crate::agent::state::{OpenEnforcement, OpenProposal, WorldEvent, WorldSnapshot};

/// Proposal to insert
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub id: String,
    pub title: String,
    pub proposal_type: ProposalType,
    pub description: String,
    pub proposer_id: Option<String>,
    pub closes_at: DateTime<Utc>,
}

/// Enforcement vote to insert
#[derive(Debug, Clone)]
pub struct NewEnforcement {
    pub id: String,
    pub target_actor_id: String,
    pub reason: String,
    pub closes_at: DateTime<Utc>,
}

pub async fn insert_proposal(pool: &SqlitePool, proposal: &NewProposal) -> Result<()> {
    sqlx::query(
        "INSERT INTO proposals (id, title, proposal_type, description, proposer_id, status, closes_at, created_at)
         VALUES (?, ?, ?, ?, ?, 'open', ?, ?)",
    )
    .bind(&proposal.id)
    .bind(&proposal.title)
    .bind(proposal.proposal_type.as_str())
    .bind(&proposal.description)
    .bind(&proposal.proposer_id)
    .bind(to_millis(proposal.closes_at))
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await
    .context("Failed to insert proposal")?;

    Ok(())
}

pub async fn insert_enforcement(pool: &SqlitePool, enforcement: &NewEnforcement) -> Result<()> {
    sqlx::query(
        "INSERT INTO enforcements (id, target_actor_id, reason, status, closes_at, created_at)
         VALUES (?, ?, ?, 'open', ?, ?)",
    )
    .bind(&enforcement.id)
    .bind(&enforcement.target_actor_id)
    .bind(&enforcement.reason)
    .bind(to_millis(enforcement.closes_at))
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await
    .context("Failed to insert enforcement")?;

    Ok(())
}

pub async fn record_vote(
    pool: &SqlitePool,
    subject_id: &str,
    actor_id: &str,
    choice: VoteChoice,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO votes (subject_id, actor_id, choice, cast_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(subject_id, actor_id) DO UPDATE SET choice = excluded.choice, cast_at = excluded.cast_at",
    )
    .bind(subject_id)
    .bind(actor_id)
    .bind(choice.as_str())
    .bind(to_millis(at))
    .execute(pool)
    .await
    .context("Failed to record vote")?;

    Ok(())
}

pub async fn record_event(
    pool: &SqlitePool,
    kind: &str,
    summary: &str,
    actor_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO world_events (kind, summary, actor_id, occurred_at) VALUES (?, ?, ?, ?)",
    )
    .bind(kind)
    .bind(summary)
    .bind(actor_id)
    .bind(to_millis(at))
    .execute(pool)
    .await
    .context("Failed to record world event")?;

    Ok(result.last_insert_rowid())
}

/// Open ballot on a proposal or enforcement, as seen by one voter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallotStatus {
    pub has_voted: bool,
}

/// `None` when `subject_id` is neither an open proposal nor an open enforcement
pub async fn ballot_status(
    pool: &SqlitePool,
    subject_id: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<BallotStatus>> {
    let row = sqlx::query(
        "SELECT EXISTS(SELECT 1 FROM votes WHERE subject_id = ?1 AND actor_id = ?2) AS has_voted
         FROM (
             SELECT id FROM proposals WHERE id = ?1 AND status = 'open' AND closes_at > ?3
             UNION ALL
             SELECT id FROM enforcements WHERE id = ?1 AND status = 'open' AND closes_at > ?3
         ) LIMIT 1",
    )
    .bind(subject_id)
    .bind(actor_id)
    .bind(to_millis(now))
    .fetch_optional(pool)
    .await
    .context("Failed to look up ballot")?;

    match row {
        Some(row) => {
            let has_voted: bool = row.try_get("has_voted")?;
            Ok(Some(BallotStatus { has_voted }))
        }
        None => Ok(None),
    }
}

pub async fn snapshot(
    pool: &SqlitePool,
    actor_id: &str,
    now: DateTime<Utc>,
    lookback: Duration,
) -> Result<WorldSnapshot> {
    let now_ms = to_millis(now);
    let resources = actors::get_resources(pool, actor_id).await?;

    let proposal_rows = sqlx::query(
        "SELECT p.id, p.title, p.proposal_type, p.closes_at,
                EXISTS(SELECT 1 FROM votes v WHERE v.subject_id = p.id AND v.actor_id = ?) AS has_voted
         FROM proposals p
         WHERE p.status = 'open' AND p.closes_at > ?
         ORDER BY p.closes_at ASC, p.id ASC",
    )
    .bind(actor_id)
    .bind(now_ms)
    .fetch_all(pool)
    .await
    .context("Failed to load open proposals")?;

    let mut proposals = Vec::with_capacity(proposal_rows.len());
    for row in &proposal_rows {
        let proposal_type: String = row.try_get("proposal_type")?;
        proposals.push(OpenProposal {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            proposal_type: ProposalType::from_tag(&proposal_type),
            closes_at: from_millis(row.try_get("closes_at")?),
            has_voted: row.try_get("has_voted")?,
        });
    }

    let enforcement_rows = sqlx::query(
        "SELECT id, reason, closes_at FROM enforcements
         WHERE target_actor_id = ? AND status = 'open' AND closes_at > ?
         ORDER BY closes_at ASC, id ASC",
    )
    .bind(actor_id)
    .bind(now_ms)
    .fetch_all(pool)
    .await
    .context("Failed to load enforcements")?;

    let mut enforcements = Vec::with_capacity(enforcement_rows.len());
    for row in &enforcement_rows {
        enforcements.push(OpenEnforcement {
            id: row.try_get("id")?,
            reason: row.try_get("reason")?,
            closes_at: from_millis(row.try_get("closes_at")?),
        });
    }

    let event_rows = sqlx::query(
        "SELECT id, kind, summary, actor_id, occurred_at FROM world_events
         WHERE occurred_at >= ? AND occurred_at <= ?
         ORDER BY occurred_at ASC, id ASC",
    )
    .bind(to_millis(now - lookback))
    .bind(now_ms)
    .fetch_all(pool)
    .await
    .context("Failed to load world events")?;

    let mut recent_events = Vec::with_capacity(event_rows.len());
    for row in &event_rows {
        recent_events.push(WorldEvent {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            summary: row.try_get("summary")?,
            actor_id: row.try_get("actor_id")?,
            occurred_at: from_millis(row.try_get("occurred_at")?),
        });
    }

    Ok(WorldSnapshot {
        taken_at: now,
        resources,
        proposals,
        enforcements,
        recent_events,
    })
}
