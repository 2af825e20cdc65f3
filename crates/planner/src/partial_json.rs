//! Tolerant Partial-JSON Parsing
//!
//! The planner accumulates model output into a growing buffer and attempts
//! a best-effort parse after every fragment. Until the structured payload
//! closes, the buffer is malformed by construction — that is the expected
//! state, not an error, so this module returns `Option` instead of `Result`.
//!
//! The parser is a pure function of the buffer contents. It tolerates
//! leading prose and markdown fences before the payload and trailing
//! garbage after it, but it does not invent structure: a buffer whose
//! object has not closed yet yields `None` rather than a speculative
//! repair. Emission timing therefore tracks payload completion, which is
//! what downstream consumers key off.

use serde_json::Value;

/// Candidate `{` offsets scanned when the payload is preceded by prose.
const MAX_START_CANDIDATES: usize = 32;

/// Best-effort parse of a possibly-incomplete buffer.
///
/// Returns the parsed payload object, or `None` when no complete object is
/// recoverable yet. Never panics, never errors. Idempotent: a later call on
/// a strictly longer buffer either recovers a superset of fields or yields
/// `None` again — it never fabricates fields absent from the buffer.
pub fn parse_partial_json(buffer: &str) -> Option<Value> {
    let region = scan_region(buffer);
    for start in object_start_offsets(region) {
        let payload = &region[start..];

        // Fast path: the remainder is exactly one well-formed value.
        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            if value.is_object() {
                return Some(value);
            }
            continue;
        }

        // Tolerate trailing garbage (closing fences, stray prose) after a
        // complete object by decoding only the leading value.
        let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}

/// The region of the buffer to scan for payload start candidates.
///
/// A fenced payload is scanned from inside the fence, so braces in prose
/// before the fence never consume start candidates.
fn scan_region(buffer: &str) -> &str {
    if let Some(fence) = buffer.find("```") {
        let rest = &buffer[fence + 3..];
        // Skip the fence info string ("json") up to the end of the line.
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if body.contains('{') {
                return body;
            }
        }
    }
    buffer
}

/// Offsets of `{` characters that may begin the payload, in order.
///
/// The first candidate is almost always the real start; later candidates
/// cover buffers where prose before the payload itself contains a brace.
fn object_start_offsets(buffer: &str) -> impl Iterator<Item = usize> + '_ {
    buffer
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .map(|(i, _)| i)
        .take(MAX_START_CANDIDATES)
}
