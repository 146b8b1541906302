//! Retry and fallback policy
//!
//! After every failed provider call the decision client asks this table what
//! to do next. Rules are evaluated top to bottom and the first match wins:
//!
//! | # | Condition | Step |
//! |---|---|---|
//! | 1 | empty payload, alternate model not yet tried | alternate model, same provider |
//! | 2 | rate limited / billing / empty payload, fallback unused and available | one fallback call |
//! | 3 | the failed call was the fallback | give up |
//! | 4 | fatal | give up |
//! | 5 | original-provider attempts below the ceiling | backoff, retry original |
//! | 6 | anything else | give up |

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::FailureKind;

/// What the client has done so far in one decision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Calls made against the original provider (alternate model included)
    pub primary_attempts: u32,
    pub alternate_available: bool,
    pub alternate_tried: bool,
    pub fallback_available: bool,
    pub fallback_used: bool,
    /// The call that just failed went to the fallback provider
    pub on_fallback: bool,
}

/// Next step after a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AlternateModel,
    Fallback,
    Backoff(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Then {
    AlternateModel,
    Fallback,
    Backoff,
    GiveUp,
}

struct Rule {
    name: &'static str,
    when: fn(FailureKind, &AttemptState, u32) -> bool,
    then: Then,
}

const RULES: [Rule; 6] = [
    Rule {
        name: "empty_payload_alternate",
        when: |kind, s, _| {
            kind == FailureKind::EmptyPayload
                && !s.on_fallback
                && s.alternate_available
                && !s.alternate_tried
        },
        then: Then::AlternateModel,
    },
    Rule {
        name: "cross_provider_fallback",
        when: |kind, s, _| {
            matches!(
                kind,
                FailureKind::RateLimited | FailureKind::Billing | FailureKind::EmptyPayload
            ) && s.fallback_available
                && !s.fallback_used
        },
        then: Then::Fallback,
    },
    Rule {
        name: "fallback_failed",
        when: |_, s, _| s.on_fallback,
        then: Then::GiveUp,
    },
    Rule {
        name: "fatal",
        when: |kind, _, _| kind == FailureKind::Fatal,
        then: Then::GiveUp,
    },
    Rule {
        name: "bounded_retry",
        when: |_, s, max_attempts| s.primary_attempts < max_attempts,
        then: Then::Backoff,
    },
    Rule {
        name: "exhausted",
        when: |_, _, _| true,
        then: Then::GiveUp,
    },
];

/// Serializable snapshot of the retry knobs, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base_ms,
            backoff_max_ms,
        }
    }

    /// Decide the next step, returning the matching rule's name
    pub fn decide(&self, kind: FailureKind, state: &AttemptState) -> (Step, &'static str) {
        for rule in &RULES {
            if (rule.when)(kind, state, self.max_attempts) {
                let step = match rule.then {
                    Then::AlternateModel => Step::AlternateModel,
                    Then::Fallback => Step::Fallback,
                    Then::GiveUp => Step::GiveUp,
                    Then::Backoff => Step::Backoff(self.jittered_backoff(state.primary_attempts)),
                };
                return (step, rule.name);
            }
        }
        (Step::GiveUp, "exhausted")
    }

    /// `min(base * 2^(n-1), max)` for the n-th completed attempt
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }

    /// Base backoff plus up to 25% random jitter
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let max_jitter = base.as_millis() as u64 / 4;
        let jitter = if max_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter)
        };
        base + Duration::from_millis(jitter)
    }
}
