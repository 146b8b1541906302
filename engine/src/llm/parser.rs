//! Planner response parsing
//!
//! Models wrap their JSON in prose and code fences, stop mid-object, or skip
//! the JSON entirely. [`parse_action`] never fails: it tries a short ordered
//! list of extraction patterns and otherwise degrades to a `communicate`
//! action carrying the raw text (or `idle` for empty output).
//!
//! The diagnostics are reported alongside the action for logging only. They
//! do not change control flow.

use sdk::types::{Action, Strategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw text carried by the degraded `communicate` action is capped at this
pub const MAX_RAW_MESSAGE_CHARS: usize = 280;

/// Which extraction pattern produced the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPattern {
    /// First brace-delimited object in the text
    RawObject,
    /// Body of a ```json fence
    LabeledFence,
    /// Body of any ``` fence
    GenericFence,
}

const PATTERNS: [ExtractionPattern; 3] = [
    ExtractionPattern::RawObject,
    ExtractionPattern::LabeledFence,
    ExtractionPattern::GenericFence,
];

/// How parsing went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseDiagnostics {
    pub success: bool,
    /// Output looked cut off (unclosed object or fence)
    pub truncated: bool,
    /// Number of extraction patterns tried
    pub attempts: u32,
    pub pattern: Option<ExtractionPattern>,
}

/// Action decoded from a planner response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub action: Action,
    /// Strategy the planner declared, if any
    pub strategy: Option<Strategy>,
    pub diagnostics: ParseDiagnostics,
}

/// Extract one action from free-form model output
pub fn parse_action(text: &str) -> ParsedAction {
    let trimmed = text.trim();
    let truncated = looks_truncated(trimmed);

    if trimmed.is_empty() {
        return ParsedAction {
            action: Action::Idle,
            strategy: None,
            diagnostics: ParseDiagnostics {
                success: false,
                truncated: false,
                attempts: 0,
                pattern: None,
            },
        };
    }

    let mut attempts = 0;
    for pattern in PATTERNS {
        attempts += 1;
        let Some(candidate) = extract(trimmed, pattern) else {
            continue;
        };
        let Some(object) = decode_object(candidate) else {
            continue;
        };

        let strategy = object
            .get("strategy")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(Strategy::from_tag);

        return ParsedAction {
            action: Action::from_value(&object),
            strategy,
            diagnostics: ParseDiagnostics {
                success: true,
                truncated,
                attempts,
                pattern: Some(pattern),
            },
        };
    }

    ParsedAction {
        action: Action::Communicate {
            message: trimmed.chars().take(MAX_RAW_MESSAGE_CHARS).collect(),
            recipient: None,
        },
        strategy: None,
        diagnostics: ParseDiagnostics {
            success: false,
            truncated,
            attempts,
            pattern: None,
        },
    }
}

fn extract(content: &str, pattern: ExtractionPattern) -> Option<&str> {
    match pattern {
        ExtractionPattern::RawObject => {
            let start = content.find('{')?;
            extract_balanced_json(&content[start..])
        }
        ExtractionPattern::LabeledFence => {
            let start = content.find("```json")?;
            extract_fenced_body(&content[start..])
        }
        ExtractionPattern::GenericFence => extract_fenced_body(content),
    }
}

fn decode_object(candidate: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(candidate.trim()).ok()?;
    value.is_object().then_some(value)
}

/// Body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_body(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// An opened object that never closes, or an odd number of fences
fn looks_truncated(content: &str) -> bool {
    let unclosed_object = content
        .find('{')
        .map(|start| extract_balanced_json(&content[start..]).is_none())
        .unwrap_or(false);
    let unclosed_fence = content.matches("```").count() % 2 == 1;
    unclosed_object || unclosed_fence
}
