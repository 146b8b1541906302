//! Structural action pipeline
//!
//! Reference [`ActionPipeline`] for the standalone binary. It only checks
//! that an action is well formed against the current governance state and
//! records votes; what an action does to the world economy is left to the
//! host simulation.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::pipeline::{ActionPipeline, ExecutionOutcome, Validation};
use sdk::types::{Action, Actor};
use serde_json::json;
use sqlx::SqlitePool;

use crate::clock::SharedClock;
use crate::db::world;

pub struct StructuralPipeline {
    pool: SqlitePool,
    clock: SharedClock,
}

impl StructuralPipeline {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

fn db_error(e: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", e))
}

#[async_trait]
impl ActionPipeline for StructuralPipeline {
    async fn validate(&self, actor: &Actor, action: &Action) -> Result<Validation, EngineError> {
        let verdict = match action {
            Action::Work { .. } | Action::Rest | Action::Idle => Validation::accept(),
            Action::Other { kind, .. } => Validation::reject(format!("unknown action kind '{}'", kind)),
            Action::Communicate { message, .. } if message.trim().is_empty() => {
                Validation::reject("empty message")
            }
            Action::Communicate { .. } => Validation::accept(),
            Action::Propose { title, .. } if title.trim().is_empty() => {
                Validation::reject("proposal without title")
            }
            Action::Propose { .. } => Validation::accept(),
            Action::OfferTrade { offer, request, .. } if offer == request => {
                Validation::reject("trade offers and requests the same resource")
            }
            Action::OfferTrade { amount, .. } if !amount.is_finite() || *amount <= 0.0 => {
                Validation::reject("trade amount must be positive")
            }
            Action::OfferTrade { .. } => Validation::accept(),
            Action::Vote { proposal_id, .. } => {
                match world::ballot_status(&self.pool, proposal_id, &actor.id, self.clock.now())
                    .await
                    .map_err(db_error)?
                {
                    None => Validation::reject(format!("'{}' is not open for voting", proposal_id)),
                    Some(ballot) if ballot.has_voted => {
                        Validation::reject(format!("already voted on '{}'", proposal_id))
                    }
                    Some(_) => Validation::accept(),
                }
            }
        };
        Ok(verdict)
    }

    async fn execute(&self, actor: &Actor, action: &Action) -> Result<ExecutionOutcome, EngineError> {
        let outcome = match action {
            Action::Work { resource } => {
                ExecutionOutcome::new(format!("worked on {}", resource))
                    .with_effects(json!({ "resource": resource.as_str() }))
            }
            Action::Vote {
                proposal_id,
                choice,
            } => {
                world::record_vote(&self.pool, proposal_id, &actor.id, *choice, self.clock.now())
                    .await
                    .map_err(db_error)?;
                ExecutionOutcome::new(format!("voted {} on {}", choice, proposal_id))
            }
            Action::Propose {
                title,
                proposal_type,
                ..
            } => ExecutionOutcome::new(format!("proposed {} '{}'", proposal_type.as_str(), title)),
            Action::Communicate { message, recipient } => {
                let to = recipient.as_deref().unwrap_or("everyone");
                ExecutionOutcome::new(format!("told {}: {}", to, message))
            }
            Action::OfferTrade {
                offer,
                request,
                amount,
                partner,
            } => ExecutionOutcome::new(format!(
                "offered {} {} for {}{}",
                amount,
                offer,
                request,
                partner.as_deref().map(|p| format!(" to {}", p)).unwrap_or_default()
            )),
            Action::Rest => ExecutionOutcome::new("rested"),
            Action::Idle => ExecutionOutcome::new("waited"),
            Action::Other { kind, .. } => {
                return Err(EngineError::InvalidAction(kind.clone()));
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::{Database, NewProposal};
    use chrono::{Duration, TimeZone, Utc};
    use sdk::types::{ActorStatus, Personality, ProposalType, Resource, VoteChoice};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn actor() -> Actor {
        Actor {
            id: "a1".into(),
            name: "Ada".into(),
            status: ActorStatus::Active,
            model_route: "default".into(),
            personality: Personality::Neutral,
            last_active_at: None,
        }
    }

    #[tokio::test]
    async fn test_structural_checks() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("p.db")).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let pipeline = StructuralPipeline::new(db.pool().clone(), Arc::new(clock.clone()));

        assert!(pipeline
            .validate(&actor(), &Action::Work { resource: Resource::Food })
            .await
            .unwrap()
            .valid);
        assert!(!pipeline
            .validate(
                &actor(),
                &Action::OfferTrade {
                    offer: Resource::Food,
                    request: Resource::Food,
                    amount: 1.0,
                    partner: None
                }
            )
            .await
            .unwrap()
            .valid);
        assert!(!pipeline
            .validate(
                &actor(),
                &Action::Communicate {
                    message: "  ".into(),
                    recipient: None
                }
            )
            .await
            .unwrap()
            .valid);
        assert!(!pipeline
            .validate(
                &actor(),
                &Action::Other {
                    kind: "dance".into(),
                    payload: json!({})
                }
            )
            .await
            .unwrap()
            .valid);
    }

    #[tokio::test]
    async fn test_vote_once_on_open_proposal() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("v.db")).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        db.insert_actor(&actor()).await.unwrap();
        db.insert_proposal(&NewProposal {
            id: "p1".into(),
            title: "Granary".into(),
            proposal_type: ProposalType::Infrastructure,
            description: String::new(),
            proposer_id: None,
            closes_at: clock.now() + Duration::minutes(10),
        })
        .await
        .unwrap();
        let pipeline = StructuralPipeline::new(db.pool().clone(), Arc::new(clock.clone()));

        let vote = Action::Vote {
            proposal_id: "p1".into(),
            choice: VoteChoice::Yes,
        };
        assert!(pipeline.validate(&actor(), &vote).await.unwrap().valid);
        let outcome = pipeline.execute(&actor(), &vote).await.unwrap();
        assert_eq!(outcome.description, "voted yes on p1");

        let again = pipeline.validate(&actor(), &vote).await.unwrap();
        assert!(!again.valid);
        assert_eq!(again.reason.as_deref(), Some("already voted on 'p1'"));

        clock.advance(Duration::minutes(11));
        let late = Action::Vote {
            proposal_id: "p1".into(),
            choice: VoteChoice::No,
        };
        assert!(!pipeline.validate(&Actor { id: "a2".into(), ..actor() }, &late).await.unwrap().valid);
    }
}
