//! Scheduler-side data model
//!
//! Intent state, checkpoint timestamps, memory records, the world snapshot an
//! actor reasons over, and the event log vocabulary. Also the [`StateStore`]
//! contract the scheduler uses to read and commit all of it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sdk::types::{Action, Actor, ProposalType, Resource, Strategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::runtime::MAX_INTERVAL_SECS;

/// Checkpoint interval bounds in effect for one computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointWindow {
    pub min_secs: u64,
    pub max_secs: u64,
    pub jitter_secs: u64,
}

impl CheckpointWindow {
    /// Random delay in `[min, max]` plus symmetric jitter, never below `min`
    ///
    /// Every bound is capped at [`MAX_INTERVAL_SECS`].
    pub fn sample_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.min_secs.min(MAX_INTERVAL_SECS) as i64;
        let max = (self.max_secs.min(MAX_INTERVAL_SECS) as i64).max(min);
        let jitter = self.jitter_secs.min(MAX_INTERVAL_SECS) as i64;

        let base = rng.gen_range(min..=max);
        let offset = if jitter > 0 {
            rng.gen_range(-jitter..=jitter)
        } else {
            0
        };

        Duration::try_seconds((base + offset).max(min)).unwrap_or_else(Duration::zero)
    }
}

/// Derived together whenever a checkpoint fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTimestamps {
    pub last_checkpoint_at: DateTime<Utc>,
    /// Missing means the evaluator forces a checkpoint next turn
    pub next_checkpoint_at: Option<DateTime<Utc>>,
    pub intent_expires_at: DateTime<Utc>,
}

impl CheckpointTimestamps {
    /// Schedule the next checkpoint after one that completed at `now`
    pub fn schedule<R: Rng + ?Sized>(
        now: DateTime<Utc>,
        window: &CheckpointWindow,
        rng: &mut R,
    ) -> Self {
        let next = now + window.sample_delay(rng);
        Self {
            last_checkpoint_at: now,
            next_checkpoint_at: Some(next),
            intent_expires_at: next,
        }
    }
}

/// An actor's current plan, replaced wholesale at every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentState {
    pub strategy: Strategy,
    /// Key fields of the last planned action
    pub seed_action: Value,
    /// Never decreases
    pub checkpoint_number: u64,
    pub checkpoint_reason: String,
    pub updated_at: DateTime<Utc>,
    pub timestamps: CheckpointTimestamps,
}

impl IntentState {
    pub fn horizon_expires_at(&self) -> DateTime<Utc> {
        self.timestamps.intent_expires_at
    }
}

/// Keep only the fields of an action that identify it
pub fn seed_from_action(action: &Action) -> Value {
    let mut value = action.to_value();
    if let Some(obj) = value.as_object_mut() {
        obj.retain(|key, _| {
            matches!(
                key.as_str(),
                "action" | "type" | "resource" | "proposal_id" | "vote" | "offer" | "request"
                    | "recipient" | "partner" | "proposal_type"
            )
        });
    }
    value
}

/// Bounded autobiographical summary of one actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub summary: String,
    pub last_checkpoint_compacted: u64,
    pub updated_at: DateTime<Utc>,
}

/// Food, energy and materials on hand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLevels {
    pub food: f64,
    pub energy: f64,
    pub materials: f64,
}

impl ResourceLevels {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Food => self.food,
            Resource::Energy => self.energy,
            Resource::Materials => self.materials,
        }
    }

    /// Lowest resource; ties go to food, then energy
    pub fn lowest(&self) -> Resource {
        let mut lowest = Resource::Food;
        for resource in Resource::ALL {
            if self.get(resource) < self.get(lowest) {
                lowest = resource;
            }
        }
        lowest
    }

    /// First survival resource (food, then energy) under `threshold`
    pub fn starving(&self, threshold: f64) -> Option<Resource> {
        [Resource::Food, Resource::Energy]
            .into_iter()
            .find(|r| self.get(*r) < threshold)
    }
}

/// An open governance proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenProposal {
    pub id: String,
    pub title: String,
    pub proposal_type: ProposalType,
    pub closes_at: DateTime<Utc>,
    /// This actor already voted
    pub has_voted: bool,
}

/// An open enforcement vote targeting this actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenEnforcement {
    pub id: String,
    pub reason: String,
    pub closes_at: DateTime<Utc>,
}

/// Something that happened in the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub id: i64,
    pub kind: String,
    pub summary: String,
    /// Actor the event is about, if any
    pub actor_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

const CRISIS_KINDS: [&str; 6] = ["crisis", "famine", "disaster", "raid", "collapse", "epidemic"];

impl WorldEvent {
    pub fn is_crisis(&self) -> bool {
        CRISIS_KINDS.contains(&self.kind.as_str())
    }
}

/// Live view of the world from one actor's point of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub taken_at: DateTime<Utc>,
    pub resources: ResourceLevels,
    pub proposals: Vec<OpenProposal>,
    pub enforcements: Vec<OpenEnforcement>,
    /// Newest last
    pub recent_events: Vec<WorldEvent>,
}

/// Event log entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Checkpoint,
    RoutineAction,
    ActionRejected,
    InvalidAction,
    ProcessingError,
    MemoryUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Checkpoint => "checkpoint",
            EventKind::RoutineAction => "routine_action",
            EventKind::ActionRejected => "action_rejected",
            EventKind::InvalidAction => "invalid_action",
            EventKind::ProcessingError => "processing_error",
            EventKind::MemoryUpdated => "memory_updated",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "checkpoint" => Some(EventKind::Checkpoint),
            "routine_action" => Some(EventKind::RoutineAction),
            "action_rejected" => Some(EventKind::ActionRejected),
            "invalid_action" => Some(EventKind::InvalidAction),
            "processing_error" => Some(EventKind::ProcessingError),
            "memory_updated" => Some(EventKind::MemoryUpdated),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the executed action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Checkpoint,
    Routine,
    Fallback,
}

impl ActionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOrigin::Checkpoint => "checkpoint",
            ActionOrigin::Routine => "routine",
            ActionOrigin::Fallback => "fallback",
        }
    }
}

/// One append-only event log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub actor_id: String,
    pub kind: EventKind,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl LoggedEvent {
    pub fn new(actor_id: impl Into<String>, kind: EventKind, payload: Value, at: DateTime<Utc>) -> Self {
        Self {
            actor_id: actor_id.into(),
            kind,
            payload,
            at,
        }
    }
}

/// Everything written at the end of one turn, in one unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct TurnCommit {
    pub actor_id: String,
    pub at: DateTime<Utc>,
    pub events: Vec<LoggedEvent>,
    pub intent: Option<IntentState>,
    pub memory: Option<MemoryRecord>,
}

impl TurnCommit {
    pub fn new(actor_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            actor_id: actor_id.into(),
            at,
            events: Vec::new(),
            intent: None,
            memory: None,
        }
    }

    pub fn event(&mut self, kind: EventKind, payload: Value) {
        self.events
            .push(LoggedEvent::new(self.actor_id.clone(), kind, payload, self.at));
    }
}

/// Persistence collaborator
///
/// Plain key-addressed reads and one write per turn. Implementations must not
/// hold a transaction across calls.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_actor(&self, actor_id: &str) -> anyhow::Result<Option<Actor>>;

    async fn list_actors(&self) -> anyhow::Result<Vec<Actor>>;

    async fn load_intent(&self, actor_id: &str) -> anyhow::Result<Option<IntentState>>;

    async fn load_memory(&self, actor_id: &str) -> anyhow::Result<Option<MemoryRecord>>;

    /// World state as seen by `actor_id`, with events newer than `now - lookback`
    async fn world_snapshot(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> anyhow::Result<WorldSnapshot>;

    async fn append_event(&self, event: &LoggedEvent) -> anyhow::Result<()>;

    /// Write events, intent, memory and the last-active stamp atomically
    async fn commit_turn(&self, commit: TurnCommit) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sdk::types::VoteChoice;

    #[test]
    fn test_sample_delay_never_below_min() {
        let window = CheckpointWindow {
            min_secs: 300,
            max_secs: 900,
            jitter_secs: 400,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let d = window.sample_delay(&mut rng).num_seconds();
            assert!((300..=1300).contains(&d), "delay {}", d);
        }
    }

    #[test]
    fn test_oversized_window_is_capped() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = CheckpointWindow {
            min_secs: 10_000_000_000_000_000,
            max_secs: 10_000_000_000_000_000,
            jitter_secs: u64::MAX,
        };
        let cap = MAX_INTERVAL_SECS as i64;
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let d = window.sample_delay(&mut rng).num_seconds();
            assert!((cap..=2 * cap).contains(&d), "delay {}", d);
        }

        let ts = CheckpointTimestamps::schedule(now, &window, &mut rng);
        let next = ts.next_checkpoint_at.unwrap();
        assert!(next >= now + Duration::seconds(cap));
        assert!(next <= now + Duration::seconds(2 * cap));
    }

    #[test]
    fn test_schedule_sets_all_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = CheckpointWindow {
            min_secs: 60,
            max_secs: 60,
            jitter_secs: 0,
        };
        let ts = CheckpointTimestamps::schedule(now, &window, &mut StdRng::seed_from_u64(1));
        assert_eq!(ts.last_checkpoint_at, now);
        assert_eq!(ts.next_checkpoint_at, Some(now + Duration::seconds(60)));
        assert_eq!(ts.intent_expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn test_lowest_resource_ties() {
        let levels = ResourceLevels {
            food: 5.0,
            energy: 5.0,
            materials: 5.0,
        };
        assert_eq!(levels.lowest(), Resource::Food);

        let levels = ResourceLevels {
            food: 5.0,
            energy: 4.0,
            materials: 2.0,
        };
        assert_eq!(levels.lowest(), Resource::Materials);
    }

    #[test]
    fn test_starving_checks_food_first() {
        let levels = ResourceLevels {
            food: 1.0,
            energy: 1.0,
            materials: 0.0,
        };
        assert_eq!(levels.starving(3.0), Some(Resource::Food));
        assert_eq!(levels.starving(0.5), None);
    }

    #[test]
    fn test_seed_keeps_identifying_fields() {
        let seed = seed_from_action(&Action::Vote {
            proposal_id: "p1".into(),
            choice: VoteChoice::Yes,
        });
        assert_eq!(seed["action"], "vote");
        assert_eq!(seed["proposal_id"], "p1");

        let seed = seed_from_action(&Action::Propose {
            title: "Granary".into(),
            proposal_type: ProposalType::Infrastructure,
            description: "a long description".into(),
        });
        assert!(seed.get("description").is_none());
        assert!(seed.get("title").is_none());
    }
}
