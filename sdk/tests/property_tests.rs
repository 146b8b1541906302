use proptest::prelude::*;
use sdk::errors::{CadenceErrorExt, EngineError};
use sdk::types::{Action, Strategy as ActorStrategy};

// Every error variant yields a static, non-empty hint that never echoes the
// wrapped detail back to the operator.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "[a-z]{12,40}") {
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::LLMProvider(detail.clone()),
            EngineError::ActorNotFound(detail.clone()),
            EngineError::InvalidAction(detail.clone()),
            EngineError::ActionExecution(detail.clone()),
            EngineError::Serialization(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}

// Decoding arbitrary planner objects never panics, and whatever is decoded
// re-encodes to something that decodes to the same action.
proptest! {
    #[test]
    fn test_action_decoding_is_total_and_stable(
        kind in "work|vote|propose|communicate|offer_trade|rest|idle|dance|",
        resource in "food|energy|materials|gold|",
        text in "[a-zA-Z ]{0,24}",
        amount in 0.0..50.0f64,
    ) {
        let raw = serde_json::json!({
            "action": kind,
            "resource": resource,
            "proposal_id": text,
            "vote": "yes",
            "title": text,
            "message": text,
            "offer": resource,
            "request": "food",
            "amount": amount,
        });

        let action = Action::from_value(&raw);
        let again = Action::from_value(&action.to_value());
        prop_assert_eq!(again, action);
    }
}

// Strategy tags survive case and separator variations.
proptest! {
    #[test]
    fn test_strategy_tag_normalisation(
        idx in 0usize..8,
        upper in any::<bool>(),
        dashes in any::<bool>(),
    ) {
        let tags = [
            "stabilize",
            "accumulate_food",
            "accumulate_energy",
            "accumulate_materials",
            "governance",
            "social_coordination",
            "resource_exchange",
            "conserve_energy",
        ];
        let mut tag = tags[idx].to_string();
        if upper {
            tag = tag.to_uppercase();
        }
        if dashes {
            tag = tag.replace('_', "-");
        }

        let strategy = ActorStrategy::from_tag(&tag);
        prop_assert!(!matches!(strategy, ActorStrategy::Other(_)));
        prop_assert_eq!(strategy.as_str(), tags[idx]);
    }
}
