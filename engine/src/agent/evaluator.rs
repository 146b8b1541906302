//! Checkpoint/interrupt evaluator
//!
//! Decides each turn whether the actor plans (checkpoint) or keeps executing
//! its current intent. A checkpoint is due when there is no intent yet, when
//! the scheduled checkpoint is missing or has elapsed, or when an interrupt
//! fires. Interrupts are checked in priority order and are all suppressed for
//! a cooldown after the last checkpoint.

use chrono::{DateTime, Duration, Utc};
use sdk::types::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::{IntentState, WorldSnapshot};

/// Thresholds the evaluator works with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorSettings {
    pub survival_threshold: f64,
    pub proposal_deadline_window: Duration,
    pub interrupt_cooldown: Duration,
    pub crisis_lookback: Duration,
}

/// Condition forcing an early checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interrupt", rename_all = "snake_case")]
pub enum Interrupt {
    StarvationRisk { resource: Resource },
    ProposalDeadline { proposal_id: String },
    EnforcementPending { enforcement_id: String },
    CrisisEvent { event_id: i64 },
}

impl Interrupt {
    pub fn tag(&self) -> &'static str {
        match self {
            Interrupt::StarvationRisk { .. } => "starvation_risk",
            Interrupt::ProposalDeadline { .. } => "proposal_deadline",
            Interrupt::EnforcementPending { .. } => "enforcement_pending",
            Interrupt::CrisisEvent { .. } => "crisis_event",
        }
    }
}

/// Why a checkpoint fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// No intent state yet
    Initial,
    /// Next-checkpoint timestamp missing or elapsed
    Scheduled,
    Interrupt(Interrupt),
}

impl CheckpointReason {
    pub fn tag(&self) -> &'static str {
        match self {
            CheckpointReason::Initial => "initial",
            CheckpointReason::Scheduled => "scheduled",
            CheckpointReason::Interrupt(interrupt) => interrupt.tag(),
        }
    }

    /// Significant enough to force a memory update outside the cadence
    pub fn is_salient(&self) -> bool {
        matches!(
            self,
            CheckpointReason::Interrupt(
                Interrupt::StarvationRisk { .. }
                    | Interrupt::EnforcementPending { .. }
                    | Interrupt::CrisisEvent { .. }
            )
        )
    }
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Evaluator verdict for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnMode {
    Planning(CheckpointReason),
    Executing,
}

impl TurnMode {
    pub fn is_planning(&self) -> bool {
        matches!(self, TurnMode::Planning(_))
    }
}

/// Planning or executing for this turn
pub fn evaluate(
    intent: Option<&IntentState>,
    snapshot: &WorldSnapshot,
    now: DateTime<Utc>,
    settings: &EvaluatorSettings,
) -> TurnMode {
    let Some(intent) = intent else {
        return TurnMode::Planning(CheckpointReason::Initial);
    };

    match intent.timestamps.next_checkpoint_at {
        Some(next) if next > now => {}
        _ => return TurnMode::Planning(CheckpointReason::Scheduled),
    }

    if now - intent.timestamps.last_checkpoint_at < settings.interrupt_cooldown {
        return TurnMode::Executing;
    }

    match detect_interrupt(snapshot, now, settings) {
        Some(interrupt) => TurnMode::Planning(CheckpointReason::Interrupt(interrupt)),
        None => TurnMode::Executing,
    }
}

/// First interrupt condition that holds, in priority order
pub fn detect_interrupt(
    snapshot: &WorldSnapshot,
    now: DateTime<Utc>,
    settings: &EvaluatorSettings,
) -> Option<Interrupt> {
    if let Some(resource) = snapshot.resources.starving(settings.survival_threshold) {
        return Some(Interrupt::StarvationRisk { resource });
    }

    let deadline = now + settings.proposal_deadline_window;
    if let Some(proposal) = snapshot
        .proposals
        .iter()
        .find(|p| !p.has_voted && p.closes_at > now && p.closes_at <= deadline)
    {
        return Some(Interrupt::ProposalDeadline {
            proposal_id: proposal.id.clone(),
        });
    }

    if let Some(enforcement) = snapshot.enforcements.iter().find(|e| e.closes_at > now) {
        return Some(Interrupt::EnforcementPending {
            enforcement_id: enforcement.id.clone(),
        });
    }

    let since = now - settings.crisis_lookback;
    snapshot
        .recent_events
        .iter()
        .rev()
        .find(|e| e.is_crisis() && e.occurred_at >= since && e.occurred_at <= now)
        .map(|e| Interrupt::CrisisEvent { event_id: e.id })
}
