//! Planner Loop
//!
//! Drives one planner invocation: consumes the token stream source, runs
//! the tolerant parser on the accumulated buffer after every fragment,
//! builds decision snapshots, and emits a strictly-ordered event sequence —
//! token deltas interleaved with partial decisions, then exactly one final
//! decision.
//!
//! State machine: `idle → streaming → finalizing → done`. Cancellation is
//! observed once per fragment, before awaiting the next one; when set, the
//! loop proceeds directly to finalizing with whatever buffer content exists
//! and still emits a final decision.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use datapilot_core::decision::{PlannerDecision, PlannerMetrics};
use datapilot_core::events::PlannerEvent;
use datapilot_core::CoreResult;

use crate::builder::{build_decision, string_field, REASONING_ALIASES, RESPONSE_ALIASES};
use crate::partial_json::parse_partial_json;
use crate::source::{StreamFragment, TokenStream, TokenUsage};

// ============================================================================
// PlannerInput
// ============================================================================

/// Immutable request bundle for one planner invocation.
#[derive(Debug, Clone, Default)]
pub struct PlannerInput {
    /// The user message being planned for.
    pub user_message: String,
    /// Tool catalog entries (name/description JSON values).
    pub tool_catalog: Vec<Value>,
    /// Trimmed conversation history.
    pub conversation_excerpt: Option<String>,
    /// Data-source schema excerpt.
    pub schema_excerpt: Option<String>,
    /// Active instruction excerpt.
    pub instruction_excerpt: Option<String>,
    /// Observations from prior tool invocations, oldest first.
    pub prior_observations: Vec<String>,
}

impl PlannerInput {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_catalog(mut self, catalog: Vec<Value>) -> Self {
        self.tool_catalog = catalog;
        self
    }

    pub fn with_conversation_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.conversation_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_schema_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.schema_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_instruction_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.instruction_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.prior_observations.push(observation.into());
        self
    }
}

// ============================================================================
// PlannerState
// ============================================================================

/// Mutable per-invocation state. Owned exclusively by one loop instance
/// and dropped when the loop returns.
struct PlannerState {
    buffer: String,
    started_at: Instant,
    first_token_at: Option<Instant>,
    reasoning_started_at: Option<Instant>,
    assistant_started_at: Option<Instant>,
    /// Previous-iteration snapshots of the two tracked text fields; a tiny
    /// edge detector for first-content transitions.
    prev_reasoning: String,
    prev_assistant: String,
    usage: Option<TokenUsage>,
}

impl PlannerState {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            started_at: Instant::now(),
            first_token_at: None,
            reasoning_started_at: None,
            assistant_started_at: None,
            prev_reasoning: String::new(),
            prev_assistant: String::new(),
            usage: None,
        }
    }

    /// Update first-content markers for the two tracked text fields.
    /// Each marker is set at most once.
    fn observe_fields(&mut self, parsed: &Value) {
        let Some(obj) = parsed.as_object() else {
            return;
        };

        let reasoning = string_field(obj, REASONING_ALIASES).unwrap_or_default();
        if self.reasoning_started_at.is_none()
            && self.prev_reasoning.is_empty()
            && !reasoning.is_empty()
        {
            self.reasoning_started_at = Some(Instant::now());
        }
        self.prev_reasoning = reasoning;

        let assistant = string_field(obj, RESPONSE_ALIASES).unwrap_or_default();
        if self.assistant_started_at.is_none()
            && self.prev_assistant.is_empty()
            && !assistant.is_empty()
        {
            self.assistant_started_at = Some(Instant::now());
        }
        self.prev_assistant = assistant;
    }

    /// Timing metrics for a partial snapshot. Token counts stay unset.
    fn timing_metrics(&self) -> PlannerMetrics {
        PlannerMetrics {
            first_token_ms: self
                .first_token_at
                .map(|t| t.saturating_duration_since(self.started_at).as_millis() as u64),
            thinking_ms: self.reasoning_started_at.map(|start| {
                let end = self.assistant_started_at.unwrap_or_else(Instant::now);
                end.saturating_duration_since(start).as_millis() as u64
            }),
            total_duration_ms: Some(self.started_at.elapsed().as_millis() as u64),
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Final metrics: timing plus token usage. Usage is only ever attached
    /// here, on the `streaming → finalizing` transition.
    fn final_metrics(&self) -> PlannerMetrics {
        let mut metrics = self.timing_metrics();
        if let Some(usage) = self.usage {
            metrics.input_tokens = Some(usage.input_tokens);
            metrics.output_tokens = Some(usage.output_tokens);
        }
        metrics
    }
}

// ============================================================================
// Text-block dedup
// ============================================================================

/// Deduplicates free-form text blocks across incremental updates, keyed by
/// a hash of content combined with position.
///
/// Carried behavior: this identity scheme is collision-prone — identical
/// content at the same position collides even when surrounding structure
/// changed, and content mutating mid-stream changes identity. Callers
/// depend on the resulting emission pattern, so it is preserved as-is.
#[derive(Default)]
struct TextBlockTracker {
    seen: HashSet<u64>,
}

impl TextBlockTracker {
    fn block_id(position: usize, content: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        position.hash(&mut hasher);
        content.hash(&mut hasher);
        hasher.finish()
    }

    /// Record the decision's text blocks; returns whether the snapshot
    /// should be emitted (any new block, or no text blocks to compare).
    fn should_emit(&mut self, decision: &PlannerDecision) -> bool {
        let blocks = [
            (0usize, decision.reasoning.as_deref()),
            (1usize, decision.assistant_response.as_deref()),
        ];

        let mut saw_block = false;
        let mut any_new = false;
        for (position, content) in blocks {
            if let Some(content) = content {
                if !content.is_empty() {
                    saw_block = true;
                    if self.seen.insert(Self::block_id(position, content)) {
                        any_new = true;
                    }
                }
            }
        }
        !saw_block || any_new
    }
}

// ============================================================================
// PlannerLoop
// ============================================================================

/// One planner invocation: owns its input, drives a token stream source,
/// and emits [`PlannerEvent`]s. Instances are single-use state machines;
/// nothing is shared across invocations.
pub struct PlannerLoop {
    input: PlannerInput,
    cancellation: CancellationToken,
}

impl PlannerLoop {
    pub fn new(input: PlannerInput) -> Self {
        Self {
            input,
            cancellation: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with this invocation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn input(&self) -> &PlannerInput {
        &self.input
    }

    /// Run the loop to completion.
    ///
    /// Emits token deltas and partial decisions while streaming, then
    /// exactly one final decision (also returned). Parser failures are
    /// swallowed per fragment; builder validation failures degrade to a
    /// defaulted decision with an error attached; only source errors
    /// propagate.
    pub async fn run<S: TokenStream>(
        &self,
        mut source: S,
        events: mpsc::Sender<PlannerEvent>,
    ) -> CoreResult<PlannerDecision> {
        let mut state = PlannerState::new();
        let mut tracker = TextBlockTracker::default();

        debug!(
            user_message_len = self.input.user_message.len(),
            tools = self.input.tool_catalog.len(),
            observations = self.input.prior_observations.len(),
            "planner loop started"
        );

        loop {
            if self.cancellation.is_cancelled() {
                debug!("cancellation observed; finalizing with partial buffer");
                break;
            }

            let fragment = match source.next_fragment().await? {
                Some(fragment) => fragment,
                None => break,
            };
            self.consume_fragment(fragment, &mut state, &mut tracker, &events)
                .await;
        }

        // Finalizing: one last parse of the complete buffer, final metrics
        // (token usage is only computed here), final decision.
        let parsed = parse_partial_json(&state.buffer);
        if let Some(parsed) = &parsed {
            state.observe_fields(parsed);
        }
        let decision = match &parsed {
            Some(parsed) => build_decision(parsed, true),
            None => PlannerDecision::pending().finalized(),
        }
        .with_metrics(state.final_metrics());

        let _ = events
            .send(PlannerEvent::DecisionFinal {
                decision: decision.clone(),
            })
            .await;
        debug!(
            analysis_complete = decision.analysis_complete,
            has_action = decision.action.is_some(),
            "planner loop finished"
        );
        Ok(decision)
    }

    /// Streaming-state transition: accumulate, emit the delta, attempt a
    /// parse, and emit a partial decision when one is recoverable.
    async fn consume_fragment(
        &self,
        fragment: StreamFragment,
        state: &mut PlannerState,
        tracker: &mut TextBlockTracker,
        events: &mpsc::Sender<PlannerEvent>,
    ) {
        if state.first_token_at.is_none() {
            state.first_token_at = Some(Instant::now());
        }
        if let Some(usage) = fragment.usage {
            state.usage = Some(usage);
        }
        if fragment.delta.is_empty() {
            return;
        }

        state.buffer.push_str(&fragment.delta);
        let _ = events
            .send(PlannerEvent::TokenDelta {
                content: fragment.delta,
            })
            .await;

        if let Some(parsed) = parse_partial_json(&state.buffer) {
            state.observe_fields(&parsed);
            let decision = build_decision(&parsed, false).with_metrics(state.timing_metrics());
            if tracker.should_emit(&decision) {
                let _ = events
                    .send(PlannerEvent::DecisionPartial { decision })
                    .await;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
