//! Routine action synthesizer
//!
//! Pure function of the world snapshot, the stored intent and the actor's
//! personality. Used on every non-checkpoint turn and as the safety net when
//! planning fails or produces an invalid action.
//!
//! Priority:
//! 1. survival: produce the starving resource
//! 2. urgent vote: proposal closing soon and not yet voted on
//! 3. strategy continuation (stale or unknown strategy: lowest resource)

use chrono::Duration;
use sdk::types::{Action, Personality, ProposalType, Resource, Strategy, VoteChoice};

use super::state::{IntentState, OpenProposal, WorldSnapshot};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutineSettings {
    pub survival_threshold: f64,
    pub urgent_vote_window: Duration,
}

/// One deterministic action; "now" is the snapshot's `taken_at`
pub fn synthesize(
    snapshot: &WorldSnapshot,
    intent: Option<&IntentState>,
    personality: &Personality,
    settings: &RoutineSettings,
) -> Action {
    let resources = &snapshot.resources;

    if let Some(resource) = resources.starving(settings.survival_threshold) {
        return Action::Work { resource };
    }

    if let Some(proposal) = urgent_proposal(snapshot, settings.urgent_vote_window) {
        return Action::Vote {
            proposal_id: proposal.id.clone(),
            choice: vote_for(personality, &proposal.proposal_type),
        };
    }

    let lowest = Action::Work {
        resource: resources.lowest(),
    };

    let Some(intent) = intent.filter(|i| i.horizon_expires_at() > snapshot.taken_at) else {
        return lowest;
    };

    match &intent.strategy {
        Strategy::AccumulateFood => Action::Work {
            resource: Resource::Food,
        },
        Strategy::AccumulateEnergy => Action::Work {
            resource: Resource::Energy,
        },
        Strategy::AccumulateMaterials => Action::Work {
            resource: Resource::Materials,
        },
        Strategy::ConserveEnergy => Action::Rest,
        Strategy::Governance | Strategy::SocialCoordination => Action::Idle,
        // Build up whatever the planned trade offers
        Strategy::ResourceExchange => intent
            .seed_action
            .get("offer")
            .and_then(|v| v.as_str())
            .and_then(Resource::from_tag)
            .map(|resource| Action::Work { resource })
            .unwrap_or(lowest),
        Strategy::Stabilize | Strategy::Other(_) => lowest,
    }
}

/// Earliest-closing unvoted proposal inside the urgent window
fn urgent_proposal(snapshot: &WorldSnapshot, window: Duration) -> Option<&OpenProposal> {
    let now = snapshot.taken_at;
    snapshot
        .proposals
        .iter()
        .filter(|p| !p.has_voted && p.closes_at > now && p.closes_at - now <= window)
        .min_by(|a, b| a.closes_at.cmp(&b.closes_at).then_with(|| a.id.cmp(&b.id)))
}

/// Personality x proposal-type vote table; unmatched pairs abstain
pub fn vote_for(personality: &Personality, proposal_type: &ProposalType) -> VoteChoice {
    use Personality as P;
    use ProposalType as T;
    use VoteChoice::{Abstain, No, Yes};

    match (personality, proposal_type) {
        (P::Cooperative, T::Rule | T::Allocation | T::Infrastructure) => Yes,
        (P::Cooperative, T::Sanction) => No,
        (P::Competitive, T::Rule | T::Allocation | T::Infrastructure) => No,
        (P::Competitive, T::Sanction) => Yes,
        (P::Cautious, T::Rule | T::Infrastructure) => Yes,
        (P::Cautious, T::Allocation | T::Sanction) => No,
        (P::Opportunist, T::Allocation | T::Sanction) => Yes,
        (P::Opportunist, T::Rule) => No,
        (P::Neutral, T::Rule | T::Infrastructure) => Yes,
        _ => Abstain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::{CheckpointTimestamps, ResourceLevels};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn settings() -> RoutineSettings {
        RoutineSettings {
            survival_threshold: 3.0,
            urgent_vote_window: Duration::minutes(5),
        }
    }

    fn world(food: f64, energy: f64, materials: f64) -> WorldSnapshot {
        WorldSnapshot {
            taken_at: now(),
            resources: ResourceLevels {
                food,
                energy,
                materials,
            },
            proposals: vec![],
            enforcements: vec![],
            recent_events: vec![],
        }
    }

    fn intent(strategy: Strategy) -> IntentState {
        IntentState {
            strategy,
            seed_action: json!({"action": "offer_trade", "offer": "materials", "request": "food"}),
            checkpoint_number: 1,
            checkpoint_reason: "initial".into(),
            updated_at: now(),
            timestamps: CheckpointTimestamps {
                last_checkpoint_at: now(),
                next_checkpoint_at: Some(now() + Duration::minutes(10)),
                intent_expires_at: now() + Duration::minutes(10),
            },
        }
    }

    fn proposal(id: &str, minutes: i64, proposal_type: ProposalType) -> OpenProposal {
        OpenProposal {
            id: id.into(),
            title: id.into(),
            proposal_type,
            closes_at: now() + Duration::minutes(minutes),
            has_voted: false,
        }
    }

    #[test]
    fn test_starving_food_beats_strategy() {
        let action = synthesize(
            &world(1.5, 10.0, 10.0),
            Some(&intent(Strategy::AccumulateEnergy)),
            &Personality::Neutral,
            &settings(),
        );
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Food
            }
        );
    }

    #[test]
    fn test_strategy_continuation() {
        let action = synthesize(
            &world(10.0, 10.0, 10.0),
            Some(&intent(Strategy::AccumulateEnergy)),
            &Personality::Neutral,
            &settings(),
        );
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Energy
            }
        );

        let action = synthesize(
            &world(10.0, 10.0, 10.0),
            Some(&intent(Strategy::ConserveEnergy)),
            &Personality::Neutral,
            &settings(),
        );
        assert_eq!(action, Action::Rest);
    }

    #[test]
    fn test_trade_preparation_uses_seed_offer() {
        let action = synthesize(
            &world(10.0, 8.0, 9.0),
            Some(&intent(Strategy::ResourceExchange)),
            &Personality::Neutral,
            &settings(),
        );
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Materials
            }
        );
    }

    #[test]
    fn test_stale_or_unknown_strategy_produces_lowest() {
        let mut stale = intent(Strategy::AccumulateFood);
        stale.timestamps.intent_expires_at = now() - Duration::seconds(1);
        let action = synthesize(&world(10.0, 9.0, 4.0), Some(&stale), &Personality::Neutral, &settings());
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Materials
            }
        );

        let unknown = intent(Strategy::Other("dance".into()));
        let action = synthesize(&world(10.0, 5.0, 7.0), Some(&unknown), &Personality::Neutral, &settings());
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Energy
            }
        );

        let action = synthesize(&world(10.0, 5.0, 7.0), None, &Personality::Neutral, &settings());
        assert_eq!(
            action,
            Action::Work {
                resource: Resource::Energy
            }
        );
    }

    #[test]
    fn test_urgent_vote_uses_table() {
        let mut snapshot = world(10.0, 10.0, 10.0);
        snapshot.proposals = vec![
            proposal("later", 30, ProposalType::Rule),
            proposal("sanction", 3, ProposalType::Sanction),
            proposal("rule", 4, ProposalType::Rule),
        ];
        let action = synthesize(
            &snapshot,
            Some(&intent(Strategy::AccumulateFood)),
            &Personality::Competitive,
            &settings(),
        );
        assert_eq!(
            action,
            Action::Vote {
                proposal_id: "sanction".into(),
                choice: VoteChoice::Yes
            }
        );

        snapshot.proposals[1].has_voted = true;
        let action = synthesize(&snapshot, None, &Personality::Cooperative, &settings());
        assert_eq!(
            action,
            Action::Vote {
                proposal_id: "rule".into(),
                choice: VoteChoice::Yes
            }
        );
    }

    #[test]
    fn test_unmatched_pairs_abstain() {
        assert_eq!(
            vote_for(&Personality::Other("mystic".into()), &ProposalType::Rule),
            VoteChoice::Abstain
        );
        assert_eq!(
            vote_for(&Personality::Cooperative, &ProposalType::Other("festival".into())),
            VoteChoice::Abstain
        );
        assert_eq!(
            vote_for(&Personality::Neutral, &ProposalType::Sanction),
            VoteChoice::Abstain
        );
    }

    #[test]
    fn test_identical_inputs_identical_output() {
        let mut snapshot = world(4.0, 5.0, 3.5);
        snapshot.proposals = vec![proposal("p", 2, ProposalType::Allocation)];
        let stored = intent(Strategy::Governance);
        let first = synthesize(&snapshot, Some(&stored), &Personality::Cautious, &settings());
        for _ in 0..10 {
            assert_eq!(
                synthesize(&snapshot, Some(&stored), &Personality::Cautious, &settings()),
                first
            );
        }
    }
}
