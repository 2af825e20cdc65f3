//! Unified Stream Event Types
//!
//! Event types emitted by the planner loop and by tool implementations.
//! Both streams are strictly ordered, finite sequences of tagged values
//! delivered over a `tokio::sync::mpsc` channel.
//!
//! Ordering invariants:
//! - Planner stream: token deltas and partial decisions interleave freely;
//!   exactly one `DecisionFinal` per invocation, always last.
//! - Tool stream: exactly one `Start`, zero-or-more `Progress`/`Stdout`,
//!   exactly one `End`, always last.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::PlannerDecision;
use crate::tool::ToolOutput;

/// Event emitted by the planner loop while streaming one decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerEvent {
    /// Raw text fragment received from the token stream source.
    TokenDelta { content: String },

    /// An incrementally-refined decision snapshot built from the
    /// partially-accumulated buffer.
    DecisionPartial { decision: PlannerDecision },

    /// The final decision, built from the complete buffer with
    /// `streaming_complete = true` and token usage attached.
    DecisionFinal { decision: PlannerDecision },
}

/// Event emitted by a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Tool invocation started.
    Start {
        tool_name: String,
        invocation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Stage-level progress update (e.g. "generating", "executing").
    Progress {
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Captured output text produced while the tool ran.
    Stdout { text: String },

    /// Tool invocation finished. Always the last event.
    End {
        output: ToolOutput,
        /// Compact summary for the planner's next turn.
        observation: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_delta_serialization() {
        let event = PlannerEvent::TokenDelta {
            content: "Hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"token_delta\""));
        assert!(json.contains("\"content\":\"Hello\""));

        let parsed: PlannerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_decision_final_serialization() {
        let event = PlannerEvent::DecisionFinal {
            decision: PlannerDecision::pending().finalized(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"decision_final\""));
        assert!(json.contains("\"streaming_complete\":true"));

        let parsed: PlannerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_tool_event_start_serialization() {
        let event = ToolEvent::Start {
            tool_name: "generate_data".to_string(),
            invocation_id: "inv-1".to_string(),
            metadata: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"start\""));
        assert!(!json.contains("metadata"));

        let parsed: ToolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_tool_event_end_serialization() {
        let event = ToolEvent::End {
            output: ToolOutput::err("boom"),
            observation: "failed after 3 attempts".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"end\""));
        assert!(json.contains("\"observation\":\"failed after 3 attempts\""));

        let parsed: ToolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_progress_payload_roundtrip() {
        let event = ToolEvent::Progress {
            stage: "generating".to_string(),
            payload: Some(serde_json::json!({"retry_index": 1})),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ToolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
