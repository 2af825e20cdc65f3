//! DataPilot Core
//!
//! Foundational types for the DataPilot execution core: error types, the
//! decision model, planner/tool event contracts, tabular result types, and
//! the unified streaming tool abstraction. This crate has zero dependencies
//! on the planner or engine crates.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `decision` - Decision model (`PlannerDecision`, `PlannerAction`, `PlannerMetrics`)
//! - `events` - Planner and tool event streams (`PlannerEvent`, `ToolEvent`)
//! - `table` - Tabular result types (`TablePayload`, `ColumnStats`, `ExecutionOutput`)
//! - `tool` - Streaming tool contract (`Tool`, `ToolContext`, `ToolRegistry`)
//!
//! ## Design Principles
//!
//! 1. **Optional results over exceptions** - expected conditions (incomplete
//!    buffers, recoverable validation failures) never surface as errors
//! 2. **Trait-based seams** - tools, stream sources, and engine collaborators
//!    are traits so every piece can be mocked in tests
//! 3. **Unidirectional dependency** - this crate depends on nothing else in
//!    the workspace

pub mod decision;
pub mod error;
pub mod events;
pub mod table;
pub mod tool;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Decision Model ─────────────────────────────────────────────────────
pub use decision::{DecisionError, PlannerAction, PlannerDecision, PlannerMetrics};

// ── Event Streams ──────────────────────────────────────────────────────
pub use events::{PlannerEvent, ToolEvent};

// ── Tabular Results ────────────────────────────────────────────────────
pub use table::{ColumnDescriptor, ColumnStats, ExecutionOutput, TablePayload, TableStats};

// ── Tool Contract ──────────────────────────────────────────────────────
pub use tool::{Tool, ToolContext, ToolOutput, ToolRegistry};
