//! Planner Decision Model
//!
//! The externally visible, strongly-typed output of one planner turn.
//! A decision is built after every streamed fragment (partial snapshots)
//! and once more when the stream ends (the final snapshot).
//!
//! Invariants maintained by the decision builder:
//! - `action != None` implies `analysis_complete == false`
//! - `final_answer != None` implies `analysis_complete == true`
//! - `action` and `final_answer` are never both set

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool-call shaped action selected by the planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerAction {
    /// Action discriminator, currently always "tool_call".
    #[serde(rename = "type", default = "default_action_type")]
    pub action_type: String,
    /// Name of the tool to invoke. Dispatch key into the tool registry.
    pub name: String,
    /// JSON arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

fn default_action_type() -> String {
    "tool_call".to_string()
}

impl PlannerAction {
    /// Create a tool-call action.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            action_type: default_action_type(),
            name: name.into(),
            arguments,
        }
    }
}

/// Structured description of a recovered decision validation failure.
///
/// Attached to an otherwise-usable decision instead of aborting the loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionError {
    /// Stable machine-readable code (e.g. "invalid_field", "conflicting_outcome").
    pub code: String,
    /// Human-readable description of what was wrong with the raw payload.
    pub message: String,
}

impl DecisionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Derived timing/usage facts for one planner invocation.
///
/// Timing fields are present whenever the corresponding markers exist;
/// token counts are only populated on the final decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlannerMetrics {
    /// Milliseconds from invocation start to the first received fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_ms: Option<u64>,
    /// Milliseconds between reasoning-field first content and
    /// assistant-field first content (or now, if the assistant field
    /// never produced content).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_ms: Option<u64>,
    /// Milliseconds from invocation start to this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

/// The structured, partially-or-fully resolved output of one planner turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerDecision {
    /// Whether the planner considers the analysis finished.
    pub analysis_complete: bool,
    /// Plan classification as reported by the model (e.g. "query", "visualization").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    /// Model reasoning text streamed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// User-facing assistant text streamed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    /// The next action to take. Mutually exclusive with `final_answer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<PlannerAction>,
    /// The final answer text. Mutually exclusive with `action`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    /// True only on the single final decision of an invocation.
    pub streaming_complete: bool,
    /// Recovered validation failure, if the raw payload was malformed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DecisionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PlannerMetrics>,
}

impl PlannerDecision {
    /// A defaulted, not-yet-resolved decision. Safe fallback shape.
    pub fn pending() -> Self {
        Self {
            analysis_complete: false,
            plan_type: None,
            reasoning: None,
            assistant_response: None,
            action: None,
            final_answer: None,
            streaming_complete: false,
            error: None,
            metrics: None,
        }
    }

    /// Attach a recovered validation error.
    pub fn with_error(mut self, error: DecisionError) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: PlannerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Mark this decision as the final one of the invocation.
    pub fn finalized(mut self) -> Self {
        self.streaming_complete = true;
        self
    }

    /// Check the action/final_answer exclusivity invariants.
    pub fn invariants_hold(&self) -> bool {
        if self.action.is_some() && self.final_answer.is_some() {
            return false;
        }
        if self.action.is_some() && self.analysis_complete {
            return false;
        }
        if self.final_answer.is_some() && !self.analysis_complete {
            return false;
        }
        true
    }
}

impl Default for PlannerDecision {
    fn default() -> Self {
        Self::pending()
    }
}
