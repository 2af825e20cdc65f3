//! DataPilot Engine
//!
//! The code generation/execution retry engine: a bounded
//! generate → validate → execute loop whose failed attempts feed back
//! into the next generation request, plus result normalization and the
//! tool wrapper that exposes the engine to the planner.
//!
//! ## Module Organization
//!
//! - `contracts` - Collaborator traits and the invocation context bundle
//! - `retry` - The bounded retry state machine (`RetryEngine`)
//! - `normalize` - Raw rows → display-ready `TablePayload`
//! - `tool` - `DataQueryTool`, the engine behind the unified tool contract

pub mod contracts;
pub mod normalize;
pub mod retry;
pub mod tool;

pub use contracts::{
    ClientHandles, CodeExecutor, CodeGenerator, CodeValidator, EngineContext, GenerationRequest,
    InputFile, ValidationVerdict,
};
pub use normalize::{normalize_rows, NormalizeOptions};
pub use retry::{
    EngineOutcome, EnginePhase, GenerationAttempt, RetryEngine, DEFAULT_MAX_RETRIES,
};
pub use tool::{DataQueryTool, DATA_QUERY_TOOL_NAME};
