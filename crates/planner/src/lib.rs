//! DataPilot Planner
//!
//! The streaming decision state machine: accumulates model output fragments
//! into a buffer, parses it tolerantly after every fragment, and emits an
//! ordered stream of decision snapshots.
//!
//! ## Module Organization
//!
//! - `partial_json` - Tolerant best-effort parsing of incomplete buffers
//! - `builder` - Payload → typed `PlannerDecision` with alias resolution
//! - `source` - The token stream source interface (`TokenStream`)
//! - `loop_runner` - The planner loop state machine (`PlannerLoop`)

pub mod builder;
pub mod loop_runner;
pub mod partial_json;
pub mod source;

pub use builder::build_decision;
pub use loop_runner::{PlannerInput, PlannerLoop};
pub use partial_json::parse_partial_json;
pub use source::{ScriptedStream, StreamFragment, TokenStream, TokenUsage};
