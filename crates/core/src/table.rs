//! Tabular Result Types
//!
//! Display-ready tabular payloads produced by a successful execute phase
//! of the retry engine, plus the raw executor output they are built from.
//! Statistics are computed defensively by the engine crate: a column whose
//! statistic cannot be computed carries a safe default instead of failing
//! the whole payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column identity for display: machine name plus human label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub label: String,
}

impl ColumnDescriptor {
    /// Create a descriptor, deriving the label from a snake_case name.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = name
            .split('_')
            .filter(|p| !p.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self { name, label }
    }
}

/// Per-column statistics. Optional fields are `None` when the statistic
/// could not be computed for this column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    /// Cells that are missing or JSON null.
    pub null_count: usize,
    /// Distinct scalar values; `None` when the column holds values with
    /// no stable identity (nested objects/arrays).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

/// Table-level statistics block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableStats {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnStats>,
}

/// Display-ready tabular payload: column descriptors, a row-limited
/// sample, and a statistics block over the full result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TablePayload {
    pub columns: Vec<ColumnDescriptor>,
    /// Row-limited sample; each row is a JSON object keyed by column name.
    pub rows: Vec<Value>,
    pub stats: TableStats,
    /// True when `rows` holds fewer rows than the full result.
    pub truncated: bool,
}

impl TablePayload {
    /// Empty payload, used for the success-shaped cancelled outcome.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.columns.is_empty()
    }
}

/// Raw output of the code executor: full rows plus the execution log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutput {
    /// Full result rows as JSON objects.
    pub rows: Vec<Value>,
    /// Captured execution log text.
    pub log: String,
}
