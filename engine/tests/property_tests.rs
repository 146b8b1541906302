use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use cadence_engine::agent::evaluator::{evaluate, CheckpointReason, EvaluatorSettings, TurnMode};
use cadence_engine::agent::memory::{compact, TRIMMED_MARKER};
use cadence_engine::agent::routine::{synthesize, RoutineSettings};
use cadence_engine::agent::state::{
    CheckpointTimestamps, CheckpointWindow, IntentState, ResourceLevels, WorldSnapshot,
};
use cadence_engine::llm::parser::parse_action;
use cadence_engine::llm::router::split_bucket;
use sdk::types::{Action, Personality, Resource, Strategy as ActorStrategy};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn snapshot(levels: ResourceLevels, at: DateTime<Utc>) -> WorldSnapshot {
    WorldSnapshot {
        taken_at: at,
        resources: levels,
        proposals: vec![],
        enforcements: vec![],
        recent_events: vec![],
    }
}

fn intent(last: DateTime<Utc>, next: Option<DateTime<Utc>>, strategy: ActorStrategy) -> IntentState {
    IntentState {
        strategy,
        seed_action: json!({"action": "idle"}),
        checkpoint_number: 4,
        checkpoint_reason: "scheduled".into(),
        updated_at: last,
        timestamps: CheckpointTimestamps {
            last_checkpoint_at: last,
            next_checkpoint_at: next,
            intent_expires_at: next.unwrap_or(last),
        },
    }
}

fn evaluator_settings(cooldown_secs: i64) -> EvaluatorSettings {
    EvaluatorSettings {
        survival_threshold: 3.0,
        proposal_deadline_window: Duration::minutes(10),
        interrupt_cooldown: Duration::seconds(cooldown_secs),
        crisis_lookback: Duration::minutes(15),
    }
}

fn levels() -> impl Strategy<Value = ResourceLevels> {
    (0.0..20.0f64, 0.0..20.0f64, 0.0..20.0f64).prop_map(|(food, energy, materials)| {
        ResourceLevels {
            food,
            energy,
            materials,
        }
    })
}

fn any_strategy() -> impl Strategy<Value = ActorStrategy> {
    prop_oneof![
        Just(ActorStrategy::Stabilize),
        Just(ActorStrategy::AccumulateFood),
        Just(ActorStrategy::AccumulateEnergy),
        Just(ActorStrategy::AccumulateMaterials),
        Just(ActorStrategy::Governance),
        Just(ActorStrategy::SocialCoordination),
        Just(ActorStrategy::ResourceExchange),
        Just(ActorStrategy::ConserveEnergy),
    ]
}

proptest! {
    #[test]
    fn test_memory_stays_bounded_and_keeps_newest_entry(
        existing in proptest::collection::vec("[a-z #=]{0,60}", 0..12),
        entry in "#[0-9]{1,3} [a-z =]{0,80}",
        max_chars in 40usize..400,
    ) {
        let existing = existing.join("\n");
        let out = compact(&existing, &entry, max_chars);

        prop_assert!(out.chars().count() <= max_chars);
        if entry.chars().count() <= max_chars {
            prop_assert!(out.ends_with(&entry));
        }
        prop_assert!(out.matches(TRIMMED_MARKER).count() <= 1);
    }

    #[test]
    fn test_checkpoint_delay_within_bounds(
        min in 1u64..2000,
        span in 0u64..2000,
        jitter in 0u64..300,
        seed in any::<u64>(),
    ) {
        use rand::SeedableRng;
        let window = CheckpointWindow { min_secs: min, max_secs: min + span, jitter_secs: jitter };
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let delay = window.sample_delay(&mut rng).num_seconds();

        prop_assert!(delay >= min as i64);
        prop_assert!(delay <= (min + span + jitter) as i64);
    }

    #[test]
    fn test_missing_or_due_intent_always_plans(
        resources in levels(),
        overdue_secs in 0i64..10_000,
        strategy in any_strategy(),
    ) {
        let now = base();
        let snap = snapshot(resources, now);
        let settings = evaluator_settings(120);

        prop_assert_eq!(
            evaluate(None, &snap, now, &settings),
            TurnMode::Planning(CheckpointReason::Initial)
        );

        let due = intent(now - Duration::hours(3), Some(now - Duration::seconds(overdue_secs)), strategy.clone());
        prop_assert_eq!(
            evaluate(Some(&due), &snap, now, &settings),
            TurnMode::Planning(CheckpointReason::Scheduled)
        );

        let unscheduled = intent(now - Duration::hours(3), None, strategy);
        prop_assert_eq!(
            evaluate(Some(&unscheduled), &snap, now, &settings),
            TurnMode::Planning(CheckpointReason::Scheduled)
        );
    }

    #[test]
    fn test_cooldown_suppresses_interrupts(
        resources in levels(),
        since_checkpoint in 0i64..120,
        strategy in any_strategy(),
    ) {
        let now = base();
        let snap = snapshot(resources, now);
        let recent = intent(
            now - Duration::seconds(since_checkpoint),
            Some(now + Duration::minutes(10)),
            strategy,
        );

        prop_assert_eq!(
            evaluate(Some(&recent), &snap, now, &evaluator_settings(120)),
            TurnMode::Executing
        );
    }

    #[test]
    fn test_routine_is_deterministic_and_feeds_starving_actor(
        resources in levels(),
        strategy in any_strategy(),
    ) {
        let now = base();
        let snap = snapshot(resources, now);
        let current = intent(now - Duration::minutes(1), Some(now + Duration::minutes(5)), strategy);
        let settings = RoutineSettings {
            survival_threshold: 3.0,
            urgent_vote_window: Duration::minutes(5),
        };

        let first = synthesize(&snap, Some(&current), &Personality::Neutral, &settings);
        let second = synthesize(&snap, Some(&current), &Personality::Neutral, &settings);
        prop_assert_eq!(&first, &second);

        let starving = [Resource::Food, Resource::Energy, Resource::Materials]
            .into_iter()
            .find(|r| resources.get(*r) < 3.0);
        if let Some(resource) = starving {
            prop_assert_eq!(first, Action::Work { resource });
        }
    }

    #[test]
    fn test_split_bucket_stable_and_in_range(seed in "[a-z]{1,8}", actor in "[a-z0-9-]{1,20}") {
        let bucket = split_bucket(&seed, &actor);
        prop_assert!(bucket < 100);
        prop_assert_eq!(bucket, split_bucket(&seed, &actor));
    }

    #[test]
    fn test_parser_never_panics(text in "\\PC{0,300}") {
        let parsed = parse_action(&text);
        if text.trim().is_empty() {
            prop_assert!(!parsed.diagnostics.success);
        }
    }
}
