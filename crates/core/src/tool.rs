//! Unified Tool Contract
//!
//! Every tool — including the code generation/execution retry engine — is
//! polymorphic over one capability: run, streaming a `Start` event,
//! zero-or-more `Progress`/`Stdout` events, and exactly one `End` event
//! carrying either a success payload or an error payload plus an
//! observation summary for the planner's next turn.
//!
//! This uniformity lets the planner's consumer dispatch on
//! `decision.action.name` via the registry without knowing concrete types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::events::ToolEvent;

// ============================================================================
// ToolOutput
// ============================================================================

/// Terminal payload of a tool invocation, carried on the `End` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    /// Whether the invocation was successful
    pub success: bool,
    /// Output payload (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful output
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error output
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Attach a data payload to an error output (e.g. the attempt history).
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ============================================================================
// ToolContext
// ============================================================================

/// Per-invocation context handed to a tool's `run`.
///
/// Carries identity plus the shared cancellation signal. Tools read the
/// signal cooperatively; they are never forcibly aborted.
#[derive(Debug, Clone)]
pub struct ToolContext {
    session_id: String,
    invocation_id: String,
    cancellation: CancellationToken,
}

impl ToolContext {
    /// Create a context with a fresh invocation id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            invocation_id: uuid::Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Set an explicit invocation id.
    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = id.into();
        self
    }

    /// Share a cancellation token with this invocation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Non-blocking read of the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// The uniform streaming execution contract.
///
/// Implementations emit events on the provided channel and must uphold the
/// ordering invariant: exactly one `Start` first, exactly one `End` last.
/// Expected failures (bad arguments, exhausted retries) are reported inside
/// the `End` event; an `Err` return is reserved for infrastructure faults.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool. Dispatch key for `decision.action.name`.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// Run the tool, streaming events on `events`.
    async fn run(
        &self,
        ctx: &ToolContext,
        args: Value,
        events: mpsc::Sender<ToolEvent>,
    ) -> CoreResult<()>;
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Registry of `Tool` implementations.
///
/// O(1) lookup by name with insertion-ordered iteration, so tool catalogs
/// sent to the model are deterministic.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name. Returns the removed tool, or None.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.order.retain(|n| n != name);
        self.tools.remove(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool catalog as JSON values in registration order, suitable for
    /// inclusion in a `PlannerInput`.
    pub fn catalog(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                })
            })
            .collect()
    }

    /// Run a tool by action name.
    ///
    /// Returns `Err(CoreError::NotFound)` if the tool is not registered.
    pub async fn run(
        &self,
        name: &str,
        ctx: &ToolContext,
        args: Value,
        events: mpsc::Sender<ToolEvent>,
    ) -> CoreResult<()> {
        match self.tools.get(name) {
            Some(tool) => tool.run(ctx, args, events).await,
            None => Err(CoreError::not_found(format!("Tool not found: {}", name))),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A mock tool that emits a well-ordered event sequence.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input"
        }

        async fn run(
            &self,
            ctx: &ToolContext,
            args: Value,
            events: mpsc::Sender<ToolEvent>,
        ) -> CoreResult<()> {
            let _ = events
                .send(ToolEvent::Start {
                    tool_name: self.name().to_string(),
                    invocation_id: ctx.invocation_id().to_string(),
                    metadata: None,
                })
                .await;
            let _ = events
                .send(ToolEvent::Stdout {
                    text: args.to_string(),
                })
                .await;
            let _ = events
                .send(ToolEvent::End {
                    output: ToolOutput::ok(args),
                    observation: "echoed input".to_string(),
                })
                .await;
            Ok(())
        }
    }

    async fn collect_events(mut rx: mpsc::Receiver<ToolEvent>) -> Vec<ToolEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_tool_output_ok() {
        let output = ToolOutput::ok(serde_json::json!({"rows": 3}));
        assert!(output.success);
        assert!(output.data.is_some());
        assert!(output.error.is_none());
    }

    #[test]
    fn test_tool_output_err_with_data() {
        let output = ToolOutput::err("boom").with_data(serde_json::json!(["attempt 1"]));
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("boom"));
        assert!(output.data.is_some());
    }

    #[test]
    fn test_tool_context_identity() {
        let ctx = ToolContext::new("sess-1").with_invocation_id("inv-7");
        assert_eq!(ctx.session_id(), "sess-1");
        assert_eq!(ctx.invocation_id(), "inv-7");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_tool_context_cancellation_shared() {
        let token = CancellationToken::new();
        let ctx = ToolContext::new("sess-1").with_cancellation(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_tool_context_generates_invocation_id() {
        let a = ToolContext::new("s");
        let b = ToolContext::new("s");
        assert_ne!(a.invocation_id(), b.invocation_id());
    }

    #[tokio::test]
    async fn test_tool_event_ordering() {
        let (tx, rx) = mpsc::channel(16);
        let ctx = ToolContext::new("sess-1");
        EchoTool
            .run(&ctx, serde_json::json!({"a": 1}), tx)
            .await
            .unwrap();

        let events = collect_events(rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events.first(), Some(ToolEvent::Start { .. })));
        assert!(matches!(events.last(), Some(ToolEvent::End { .. })));
        let starts = events
            .iter()
            .filter(|e| matches!(e, ToolEvent::Start { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e, ToolEvent::End { .. }))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_names_preserve_insertion_order() {
        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "named"
            }
            async fn run(
                &self,
                _ctx: &ToolContext,
                _args: Value,
                _events: mpsc::Sender<ToolEvent>,
            ) -> CoreResult<()> {
                Ok(())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("c")));
        registry.register(Arc::new(Named("a")));
        registry.register(Arc::new(Named("b")));
        assert_eq!(registry.names(), vec!["c", "a", "b"]);

        registry.unregister("a");
        assert_eq!(registry.names(), vec!["c", "b"]);
    }

    #[test]
    fn test_registry_catalog() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0]["name"], "echo");
        assert_eq!(catalog[0]["description"], "Echoes its input");
    }

    #[tokio::test]
    async fn test_registry_run_unknown_tool() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new("sess-1");
        let (tx, _rx) = mpsc::channel(4);
        let result = registry.run("missing", &ctx, Value::Null, tx).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_registry_run_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let ctx = ToolContext::new("sess-1");
        let (tx, rx) = mpsc::channel(16);
        registry
            .run("echo", &ctx, serde_json::json!("hi"), tx)
            .await
            .unwrap();

        let events = collect_events(rx).await;
        assert!(matches!(events.last(), Some(ToolEvent::End { .. })));
    }
}
