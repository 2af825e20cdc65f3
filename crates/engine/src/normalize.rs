//! Result Normalization
//!
//! Turns raw executor rows into a display-ready [`TablePayload`]: column
//! discovery in first-seen order, a row-limited sample, and per-column
//! statistics over the full result. Statistics degrade per column; a cell
//! that defeats one statistic never fails the payload.

use std::collections::HashSet;

use serde_json::Value;

use datapilot_core::table::{ColumnDescriptor, ColumnStats, TablePayload, TableStats};

/// Normalization knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Maximum rows carried in the display sample.
    pub row_limit: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { row_limit: 100 }
    }
}

/// Build a display payload from full result rows.
///
/// Column order is first-seen across object rows. Non-object rows
/// contribute no columns but still count toward `row_count` and stay in
/// the sample, so malformed executor output remains visible.
pub fn normalize_rows(rows: &[Value], options: &NormalizeOptions) -> TablePayload {
    let mut column_names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if seen.insert(key.clone()) {
                    column_names.push(key.clone());
                }
            }
        }
    }

    let column_stats = column_names
        .iter()
        .map(|name| column_stats(name, rows))
        .collect::<Vec<_>>();

    let sample: Vec<Value> = rows.iter().take(options.row_limit).cloned().collect();
    let truncated = rows.len() > sample.len();

    TablePayload {
        columns: column_names
            .iter()
            .map(ColumnDescriptor::from_name)
            .collect(),
        rows: sample,
        stats: TableStats {
            row_count: rows.len(),
            column_count: column_names.len(),
            columns: column_stats,
        },
        truncated,
    }
}

fn column_stats(name: &str, rows: &[Value]) -> ColumnStats {
    let mut null_count = 0usize;
    let mut distinct: Option<HashSet<String>> = Some(HashSet::new());
    let mut numeric: Vec<f64> = Vec::new();

    for row in rows {
        let cell = row.as_object().and_then(|obj| obj.get(name));
        match cell {
            None | Some(Value::Null) => null_count += 1,
            Some(value) => {
                match scalar_key(value) {
                    Some(key) => {
                        if let Some(set) = distinct.as_mut() {
                            set.insert(key);
                        }
                    }
                    // A nested value has no stable identity; distinctness
                    // is unknowable for this column.
                    None => distinct = None,
                }
                if let Some(n) = value.as_f64() {
                    numeric.push(n);
                }
            }
        }
    }

    let (min, max, mean) = if numeric.is_empty() {
        (None, None, None)
    } else {
        let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
        (Some(min), Some(max), Some(mean))
    };

    ColumnStats {
        name: name.to_string(),
        null_count,
        unique_count: distinct.map(|set| set.len()),
        min,
        max,
        mean,
    }
}

/// Stable identity for a scalar cell; `None` for nested values.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(format!("b:{}", b)),
        Value::Number(n) => Some(format!("n:{}", n)),
        Value::String(s) => Some(format!("s:{}", s)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
