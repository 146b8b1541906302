//! Memory compactor
//!
//! One bounded autobiographical summary per actor, updated at checkpoints only.
//! A checkpoint updates memory when no record exists yet, when its number is a
//! multiple of the cadence, or when something salient happened (salient world
//! or actor events, or a salient checkpoint reason). Entries are appended one
//! line each; when the text outgrows the cap the oldest lines go first.

use chrono::{DateTime, Duration, Utc};
use sdk::types::Strategy;

use super::state::{MemoryRecord, WorldEvent, WorldSnapshot};

/// Prefix of a summary whose older lines were dropped
pub const TRIMMED_MARKER: &str = "[trimmed older memory]";

const MAX_SALIENT_EVENTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySettings {
    pub max_chars: usize,
    pub cadence: u64,
    pub outcome_chars: usize,
    pub event_chars: usize,
    pub salience_lookback: Duration,
}

/// Why memory is being updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    FirstRecord,
    Cadence,
    Salience,
}

impl UpdateTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateTrigger::FirstRecord => "first_record",
            UpdateTrigger::Cadence => "cadence",
            UpdateTrigger::Salience => "salience",
        }
    }
}

/// What the checkpoint did, as far as memory cares
#[derive(Debug, Clone)]
pub struct CheckpointDigest<'a> {
    pub checkpoint_number: u64,
    pub at: DateTime<Utc>,
    pub strategy: &'a Strategy,
    pub action_kind: &'a str,
    pub outcome: &'a str,
    pub reason_salient: bool,
}

/// Crisis events and events about this actor inside the lookback, newest first
pub fn salient_events<'a>(
    snapshot: &'a WorldSnapshot,
    actor_id: &str,
    lookback: Duration,
) -> Vec<&'a WorldEvent> {
    let since = snapshot.taken_at - lookback;
    snapshot
        .recent_events
        .iter()
        .rev()
        .filter(|e| e.occurred_at >= since)
        .filter(|e| e.is_crisis() || e.actor_id.as_deref() == Some(actor_id))
        .take(MAX_SALIENT_EVENTS)
        .collect()
}

/// `None` means skip this checkpoint
pub fn update_trigger(
    existing: Option<&MemoryRecord>,
    checkpoint_number: u64,
    reason_salient: bool,
    has_salient_events: bool,
    cadence: u64,
) -> Option<UpdateTrigger> {
    if existing.is_none() {
        return Some(UpdateTrigger::FirstRecord);
    }
    if cadence > 0 && checkpoint_number % cadence == 0 {
        return Some(UpdateTrigger::Cadence);
    }
    if reason_salient || has_salient_events {
        return Some(UpdateTrigger::Salience);
    }
    None
}

/// One single-line memory entry
pub fn format_entry(
    digest: &CheckpointDigest<'_>,
    events: &[&WorldEvent],
    settings: &MemorySettings,
) -> String {
    let mut entry = format!(
        "#{} {} strategy={} action={} outcome=\"{}\"",
        digest.checkpoint_number,
        digest.at.format("%Y-%m-%dT%H:%MZ"),
        flatten(&digest.strategy.to_string()),
        flatten(digest.action_kind),
        clip(digest.outcome, settings.outcome_chars),
    );

    if events.is_empty() {
        entry.push_str(" | cadence refresh");
    } else {
        for event in events {
            entry.push_str(&format!(
                " | {}: {}",
                flatten(&event.kind),
                clip(&event.summary, settings.event_chars)
            ));
        }
    }
    entry
}

/// Append `entry` and trim to `max_chars`
///
/// Whole lines are kept from the newest backwards under a
/// [`TRIMMED_MARKER`] prefix. If not even the newest line fits, the result is
/// the tail of it.
pub fn compact(existing: &str, entry: &str, max_chars: usize) -> String {
    let combined = if existing.is_empty() {
        entry.to_string()
    } else {
        format!("{}\n{}", existing, entry)
    };

    if char_len(&combined) <= max_chars {
        return combined;
    }

    let marker_len = char_len(TRIMMED_MARKER) + 1;
    let budget = max_chars.saturating_sub(marker_len);

    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in combined
        .lines()
        .rev()
        .filter(|l| *l != TRIMMED_MARKER && !l.is_empty())
    {
        let cost = char_len(line) + usize::from(!kept.is_empty());
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(line);
    }

    if kept.is_empty() {
        return tail(entry, max_chars).to_string();
    }

    kept.reverse();
    format!("{}\n{}", TRIMMED_MARKER, kept.join("\n"))
}

/// Prompt-side read: the most recent `max_chars` characters
pub fn read_for_prompt(record: Option<&MemoryRecord>, max_chars: usize) -> &str {
    record.map(|r| tail(&r.summary, max_chars)).unwrap_or("")
}

/// Build the next record, or `None` when this checkpoint skips memory
pub fn update(
    existing: Option<&MemoryRecord>,
    digest: &CheckpointDigest<'_>,
    events: &[&WorldEvent],
    settings: &MemorySettings,
) -> Option<(MemoryRecord, UpdateTrigger)> {
    let trigger = update_trigger(
        existing,
        digest.checkpoint_number,
        digest.reason_salient,
        !events.is_empty(),
        settings.cadence,
    )?;

    let entry = format_entry(digest, events, settings);
    let previous = existing.map(|r| r.summary.as_str()).unwrap_or("");
    let record = MemoryRecord {
        summary: compact(previous, &entry, settings.max_chars),
        last_checkpoint_compacted: digest.checkpoint_number,
        updated_at: digest.at,
    };
    Some((record, trigger))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Single line: control characters become spaces
fn flatten(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// First `max` characters, single line
fn clip(text: &str, max: usize) -> String {
    let flat = flatten(text);
    let trimmed = flat.as_str();
    if char_len(trimmed) <= max {
        return trimmed.to_string();
    }
    let mut clipped: String = trimmed.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

/// Last `max` characters
fn tail(text: &str, max: usize) -> &str {
    let len = char_len(text);
    if len <= max {
        return text;
    }
    let skip = len - max;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
