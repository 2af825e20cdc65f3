//! Decision Builder
//!
//! Maps a best-effort parsed payload into a typed [`PlannerDecision`]
//! snapshot: resolves field aliases, enforces the action/final_answer
//! exclusivity invariants, and degrades structural validation failures to
//! safe defaults with a structured error attached. Validation failures are
//! never fatal — the builder always yields a usable decision.

use serde_json::{Map, Value};
use tracing::debug;

use datapilot_core::decision::{DecisionError, PlannerAction, PlannerDecision};

/// Accepted names for the reasoning field, canonical first.
pub(crate) const REASONING_ALIASES: &[&str] = &["reasoning", "thinking", "thought", "rationale"];

/// Accepted names for the user-facing text field, canonical first.
pub(crate) const RESPONSE_ALIASES: &[&str] = &["assistant_response", "response", "message"];

const PLAN_ALIASES: &[&str] = &["plan_type", "plan"];

/// Resolve the first present, non-empty string among `aliases`.
pub(crate) fn string_field(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(Value::String(s)) = obj.get(*alias) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

/// Build a decision snapshot from a parsed payload.
///
/// `streaming_complete` marks the single final decision of an invocation;
/// partial snapshots pass `false`. Metrics are attached by the caller.
pub fn build_decision(parsed: &Value, streaming_complete: bool) -> PlannerDecision {
    let mut decision = PlannerDecision::pending();
    decision.streaming_complete = streaming_complete;

    let Some(obj) = parsed.as_object() else {
        return decision.with_error(DecisionError::new(
            "not_an_object",
            "payload is not a JSON object",
        ));
    };

    let mut error: Option<DecisionError> = None;
    let mut record = |e: DecisionError| {
        // Keep the first failure; later ones are usually consequences of it.
        if error.is_none() {
            debug!(code = %e.code, message = %e.message, "decision validation degraded");
            error = Some(e);
        }
    };

    let explicit_complete = match obj.get("analysis_complete") {
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            record(DecisionError::new(
                "invalid_field",
                format!("analysis_complete must be a boolean, got {}", kind_of(other)),
            ));
            None
        }
        None => None,
    };
    decision.analysis_complete = explicit_complete.unwrap_or(false);

    decision.plan_type = string_field(obj, PLAN_ALIASES);
    decision.reasoning = string_field(obj, REASONING_ALIASES);
    decision.assistant_response = string_field(obj, RESPONSE_ALIASES);

    match obj.get("final_answer") {
        Some(Value::String(s)) if !s.is_empty() => decision.final_answer = Some(s.clone()),
        Some(Value::Null) | None => {}
        Some(Value::String(_)) => {}
        Some(other) => record(DecisionError::new(
            "invalid_field",
            format!("final_answer must be a string, got {}", kind_of(other)),
        )),
    }

    match obj.get("action") {
        Some(Value::Null) | None => {}
        Some(raw) => match serde_json::from_value::<PlannerAction>(raw.clone()) {
            Ok(action) if !action.name.is_empty() => decision.action = Some(action),
            Ok(_) => record(DecisionError::new(
                "invalid_action",
                "action.name must be a non-empty string",
            )),
            Err(e) => record(DecisionError::new(
                "invalid_action",
                format!("action does not match the tool_call shape: {}", e),
            )),
        },
    }

    // Exclusivity: an action and a final answer can never coexist. Keep the
    // action — an agent that still wants to act has not finished.
    if decision.action.is_some() && decision.final_answer.is_some() {
        record(DecisionError::new(
            "conflicting_outcome",
            "both action and final_answer present; keeping action",
        ));
        decision.final_answer = None;
    }

    if decision.action.is_some() {
        if explicit_complete == Some(true) {
            record(DecisionError::new(
                "conflicting_outcome",
                "action present with analysis_complete = true; coercing to false",
            ));
        }
        decision.analysis_complete = false;
    } else if decision.final_answer.is_some() {
        if explicit_complete == Some(false) {
            record(DecisionError::new(
                "conflicting_outcome",
                "final_answer present with analysis_complete = false; coercing to true",
            ));
        }
        decision.analysis_complete = true;
    }

    decision.error = error;
    debug_assert!(decision.invariants_hold());
    decision
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
