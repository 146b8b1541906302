//! Agent Core
//!
//! One turn of one actor, in three phases:
//!
//! 1. read the actor, its intent and the world, and decide planning vs routine
//! 2. planning turns only: the external decision call, with nothing held open
//! 3. validate, execute, log and commit in a single unit of work
//!
//! Checkpoint actions that fail validation get exactly one retry with the
//! routine synthesizer's action. Routine actions get none.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sdk::pipeline::ActionPipeline;
use sdk::types::{Actor, ActorStatus, Strategy};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::evaluator::{self, CheckpointReason, EvaluatorSettings, TurnMode};
use super::memory::{self, CheckpointDigest, MemorySettings};
use super::prompt;
use super::routine::{self, RoutineSettings};
use super::state::{
    seed_from_action, ActionOrigin, CheckpointTimestamps, CheckpointWindow, EventKind,
    IntentState, LoggedEvent, StateStore, TurnCommit, WorldSnapshot,
};
use crate::clock::SharedClock;
use crate::config::runtime::{RuntimeConfig, Tunables, MAX_INTERVAL_SECS};
use crate::config::{MemoryConfig, SchedulerConfig};
use crate::injection_detector::InjectionDetector;
use crate::llm::client::{DecisionRequest, Planner};

/// Suffix on the checkpoint reason when the planner produced nothing
pub const NO_RESPONSE_SUFFIX: &str = "+no_response";

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Action validated and executed
    Acted {
        origin: ActionOrigin,
        action: String,
        checkpoint: Option<u64>,
    },
    /// Routine action failed validation; nothing but the event was written
    Rejected { reason: String },
    /// Checkpoint whose planned and fallback actions both failed validation
    Invalid { checkpoint: u64 },
    /// Actor is dormant
    Dormant,
    /// Actor is dead or gone; the loop should stop
    Deregister,
    /// Cancellation arrived before the external call
    Cancelled,
}

/// Static thresholds and caps, as opposed to the runtime tunables
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub survival_threshold: f64,
    pub proposal_deadline_window: Duration,
    pub urgent_vote_window: Duration,
    pub crisis_lookback: Duration,
    pub memory: MemoryConfig,
}

impl TurnSettings {
    pub fn from_config(scheduler: &SchedulerConfig, memory: &MemoryConfig) -> Self {
        Self {
            survival_threshold: scheduler.survival_threshold,
            proposal_deadline_window: secs(scheduler.proposal_deadline_window_secs),
            urgent_vote_window: secs(scheduler.urgent_vote_window_secs),
            crisis_lookback: secs(scheduler.crisis_lookback_secs),
            memory: memory.clone(),
        }
    }

    fn snapshot_lookback(&self) -> Duration {
        self.crisis_lookback
            .max(secs(self.memory.salience_lookback_secs))
    }

    fn evaluator(&self, tunables: &Tunables) -> EvaluatorSettings {
        EvaluatorSettings {
            survival_threshold: self.survival_threshold,
            proposal_deadline_window: self.proposal_deadline_window,
            interrupt_cooldown: secs(tunables.interrupt_cooldown_secs),
            crisis_lookback: self.crisis_lookback,
        }
    }

    fn routine(&self) -> RoutineSettings {
        RoutineSettings {
            survival_threshold: self.survival_threshold,
            urgent_vote_window: self.urgent_vote_window,
        }
    }

    fn memory(&self, tunables: &Tunables) -> MemorySettings {
        MemorySettings {
            max_chars: tunables.memory_max_chars,
            cadence: tunables.memory_cadence,
            outcome_chars: self.memory.outcome_chars,
            event_chars: self.memory.event_chars,
            salience_lookback: secs(self.memory.salience_lookback_secs),
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::try_seconds(value.min(MAX_INTERVAL_SECS) as i64).unwrap_or_else(Duration::zero)
}

/// Runs turns for any actor; shared by all actor loops
pub struct AgentCore {
    store: Arc<dyn StateStore>,
    pipeline: Arc<dyn ActionPipeline>,
    planner: Arc<dyn Planner>,
    runtime: Arc<RuntimeConfig>,
    clock: SharedClock,
    guard: InjectionDetector,
    settings: TurnSettings,
}

/// Phase 1 result for a planning turn
struct Plan {
    actor: Actor,
    intent: Option<IntentState>,
    snapshot: WorldSnapshot,
    reason: CheckpointReason,
    tunables: Tunables,
}

impl AgentCore {
    pub fn new(
        store: Arc<dyn StateStore>,
        pipeline: Arc<dyn ActionPipeline>,
        planner: Arc<dyn Planner>,
        runtime: Arc<RuntimeConfig>,
        clock: SharedClock,
        settings: TurnSettings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            pipeline,
            planner,
            runtime,
            clock,
            guard: InjectionDetector::new().context("Failed to build prompt guard")?,
            settings,
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Run one turn for `actor_id`
    pub async fn run_turn(&self, actor_id: &str, cancel: &CancellationToken) -> Result<TurnOutcome> {
        // Phase 1
        let tunables = self.runtime.current().await;
        let now = self.clock.now();

        let Some(actor) = self
            .store
            .load_actor(actor_id)
            .await
            .context("Failed to load actor")?
        else {
            return Ok(TurnOutcome::Deregister);
        };
        match actor.status {
            ActorStatus::Dead => return Ok(TurnOutcome::Deregister),
            ActorStatus::Dormant => return Ok(TurnOutcome::Dormant),
            ActorStatus::Active => {}
        }

        let intent = self
            .store
            .load_intent(actor_id)
            .await
            .context("Failed to load intent state")?;
        let snapshot = self
            .store
            .world_snapshot(actor_id, now, self.settings.snapshot_lookback())
            .await
            .context("Failed to load world snapshot")?;

        match evaluator::evaluate(intent.as_ref(), &snapshot, now, &self.settings.evaluator(&tunables)) {
            TurnMode::Executing => self.routine_turn(actor, intent, snapshot).await,
            TurnMode::Planning(reason) => {
                self.checkpoint_turn(
                    Plan {
                        actor,
                        intent,
                        snapshot,
                        reason,
                        tunables,
                    },
                    cancel,
                )
                .await
            }
        }
    }

    async fn routine_turn(
        &self,
        actor: Actor,
        intent: Option<IntentState>,
        snapshot: WorldSnapshot,
    ) -> Result<TurnOutcome> {
        let action = routine::synthesize(
            &snapshot,
            intent.as_ref(),
            &actor.personality,
            &self.settings.routine(),
        );

        // Phase 3
        let at = self.clock.now();
        let mut commit = TurnCommit::new(&actor.id, at);
        let validation = self.pipeline.validate(&actor, &action).await?;

        if !validation.valid {
            let reason = validation.reason.unwrap_or_else(|| "rejected".to_string());
            info!(actor_id = %actor.id, action = action.kind(), reason = %reason, "Routine action rejected");
            commit.event(
                EventKind::ActionRejected,
                json!({
                    "origin": ActionOrigin::Routine.as_str(),
                    "action": action.to_value(),
                    "reason": reason,
                }),
            );
            self.store.commit_turn(commit).await?;
            return Ok(TurnOutcome::Rejected { reason });
        }

        let outcome = self.pipeline.execute(&actor, &action).await?;
        debug!(actor_id = %actor.id, action = action.kind(), "Routine action executed");
        commit.event(
            EventKind::RoutineAction,
            json!({
                "origin": ActionOrigin::Routine.as_str(),
                "action": action.to_value(),
                "outcome": outcome.description,
                "effects": outcome.effects,
            }),
        );
        self.store.commit_turn(commit).await?;

        Ok(TurnOutcome::Acted {
            origin: ActionOrigin::Routine,
            action: action.kind().to_string(),
            checkpoint: None,
        })
    }

    async fn checkpoint_turn(&self, plan: Plan, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let Plan {
            actor,
            intent,
            snapshot,
            reason,
            tunables,
        } = plan;

        let memory_record = self
            .store
            .load_memory(&actor.id)
            .await
            .context("Failed to load memory")?;
        let memory_settings = self.settings.memory(&tunables);

        let request = DecisionRequest {
            actor_id: actor.id.clone(),
            routing_key: actor.model_route.clone(),
            system: prompt::system_instructions(&actor, &self.guard),
            context: prompt::context_text(
                &snapshot,
                intent.as_ref(),
                memory::read_for_prompt(memory_record.as_ref(), memory_settings.max_chars),
                &reason,
                &self.guard,
            ),
            max_tokens: tunables.max_output_tokens,
            force_cheap: tunables.force_cheap_route,
        };

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // Phase 2
        let decision = self.planner.plan(&request, cancel).await;
        if cancel.is_cancelled() {
            debug!(actor_id = %actor.id, "Cancelled during planning, nothing committed");
            return Ok(TurnOutcome::Cancelled);
        }

        // Phase 3
        let at = self.clock.now();
        let checkpoint_number = intent.as_ref().map(|i| i.checkpoint_number).unwrap_or(0) + 1;
        let fallback_action = || {
            routine::synthesize(
                &snapshot,
                intent.as_ref(),
                &actor.personality,
                &self.settings.routine(),
            )
        };

        let (mut action, mut origin, planned_strategy, reason_tag) = match &decision.action {
            Some(parsed) => (
                parsed.action.clone(),
                ActionOrigin::Checkpoint,
                parsed.strategy.clone(),
                reason.tag().to_string(),
            ),
            None => {
                warn!(
                    actor_id = %actor.id,
                    checkpoint = checkpoint_number,
                    reason = reason.tag(),
                    error = decision.meta.last_error.as_deref().unwrap_or(""),
                    "Planner returned nothing, using routine fallback"
                );
                (
                    fallback_action(),
                    ActionOrigin::Fallback,
                    None,
                    format!("{}{}", reason.tag(), NO_RESPONSE_SUFFIX),
                )
            }
        };

        let mut rejections: Vec<Value> = Vec::new();
        let mut validation = self.pipeline.validate(&actor, &action).await?;

        if !validation.valid && origin == ActionOrigin::Checkpoint {
            rejections.push(json!({
                "action": action.to_value(),
                "reason": validation.reason.clone(),
            }));
            action = fallback_action();
            origin = ActionOrigin::Fallback;
            validation = self.pipeline.validate(&actor, &action).await?;
        }

        let strategy = planned_strategy.unwrap_or_else(|| match (&intent, origin) {
            (Some(previous), ActionOrigin::Fallback) => previous.strategy.clone(),
            _ => Strategy::implied_by(&action),
        });

        let timestamps = {
            let window = CheckpointWindow {
                min_secs: tunables.checkpoint_min_secs,
                max_secs: tunables.checkpoint_max_secs,
                jitter_secs: tunables.checkpoint_jitter_secs,
            };
            CheckpointTimestamps::schedule(at, &window, &mut rand::thread_rng())
        };
        let next_checkpoint_at = timestamps.next_checkpoint_at;

        let new_intent = IntentState {
            strategy: strategy.clone(),
            seed_action: seed_from_action(&action),
            checkpoint_number,
            checkpoint_reason: reason_tag.clone(),
            updated_at: at,
            timestamps,
        };

        let mut commit = TurnCommit::new(&actor.id, at);
        let call = serde_json::to_value(&decision.meta)?;

        if !validation.valid {
            rejections.push(json!({
                "action": action.to_value(),
                "reason": validation.reason.clone(),
            }));
            warn!(
                actor_id = %actor.id,
                checkpoint = checkpoint_number,
                reason = %reason_tag,
                "Checkpoint produced no valid action"
            );
            commit.event(
                EventKind::InvalidAction,
                json!({
                    "origin": origin.as_str(),
                    "checkpoint": checkpoint_number,
                    "reason": reason_tag,
                    "rejections": rejections,
                    "call": call,
                }),
            );
            commit.intent = Some(new_intent);
            self.store.commit_turn(commit).await?;
            return Ok(TurnOutcome::Invalid {
                checkpoint: checkpoint_number,
            });
        }

        let outcome = self.pipeline.execute(&actor, &action).await?;

        info!(
            actor_id = %actor.id,
            checkpoint = checkpoint_number,
            reason = %reason_tag,
            origin = origin.as_str(),
            action = action.kind(),
            strategy = %strategy,
            provider = %decision.meta.provider,
            fallback_used = decision.meta.fallback_used,
            "Checkpoint completed"
        );

        commit.event(
            EventKind::Checkpoint,
            json!({
                "origin": origin.as_str(),
                "checkpoint": checkpoint_number,
                "reason": reason_tag,
                "strategy": strategy.as_str(),
                "action": action.to_value(),
                "outcome": outcome.description,
                "effects": outcome.effects,
                "next_checkpoint_at": next_checkpoint_at,
                "rejections": rejections,
                "call": call,
            }),
        );

        let events = memory::salient_events(&snapshot, &actor.id, memory_settings.salience_lookback);
        let digest = CheckpointDigest {
            checkpoint_number,
            at,
            strategy: &strategy,
            action_kind: action.kind(),
            outcome: &outcome.description,
            reason_salient: reason.is_salient(),
        };
        if let Some((record, trigger)) =
            memory::update(memory_record.as_ref(), &digest, &events, &memory_settings)
        {
            commit.event(
                EventKind::MemoryUpdated,
                json!({
                    "checkpoint": checkpoint_number,
                    "trigger": trigger.as_str(),
                    "chars": record.summary.chars().count(),
                }),
            );
            commit.memory = Some(record);
        }

        commit.intent = Some(new_intent);
        self.store.commit_turn(commit).await?;

        Ok(TurnOutcome::Acted {
            origin,
            action: action.kind().to_string(),
            checkpoint: Some(checkpoint_number),
        })
    }

    /// Log a turn failure without letting it escape
    pub async fn record_processing_error(&self, actor_id: &str, error: &str, at: DateTime<Utc>) {
        let event = LoggedEvent::new(
            actor_id,
            EventKind::ProcessingError,
            json!({ "error": error }),
            at,
        );
        if let Err(e) = self.store.append_event(&event).await {
            warn!(actor_id, error = %e, "Failed to log processing error");
        }
    }
}
