//! Token Stream Source Interface
//!
//! The planner consumes an asynchronous, ordered, finite sequence of text
//! fragments produced by a language-model inference call. Providers adapt
//! their wire formats to this interface; the loop never sees provider
//! details. A source is consumed exactly once per invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use datapilot_core::CoreResult;

/// Token usage counters, typically carried on the terminal fragment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One fragment of streamed model output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamFragment {
    /// Raw text delta. May be empty on usage-only fragments.
    pub delta: String,
    /// Usage counters, when the provider reports them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamFragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// An ordered, finite, async sequence of fragments.
///
/// `next_fragment` returns `Ok(None)` on exhaustion. An `Err` means the
/// source itself broke; the planner loop has no recovery strategy for that
/// and propagates it to the caller.
#[async_trait]
pub trait TokenStream: Send {
    async fn next_fragment(&mut self) -> CoreResult<Option<StreamFragment>>;
}

/// In-memory scripted source, used by tests and offline replay.
pub struct ScriptedStream {
    fragments: std::collections::VecDeque<StreamFragment>,
}

impl ScriptedStream {
    pub fn new(fragments: impl IntoIterator<Item = StreamFragment>) -> Self {
        Self {
            fragments: fragments.into_iter().collect(),
        }
    }

    /// Convenience constructor from plain text pieces.
    pub fn from_text(pieces: impl IntoIterator<Item = &'static str>) -> Self {
        Self::new(pieces.into_iter().map(StreamFragment::text))
    }
}

#[async_trait]
impl TokenStream for ScriptedStream {
    async fn next_fragment(&mut self) -> CoreResult<Option<StreamFragment>> {
        Ok(self.fragments.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stream_yields_in_order_then_exhausts() {
        let mut source = ScriptedStream::from_text(["a", "b"]);
        assert_eq!(
            source.next_fragment().await.unwrap().unwrap().delta,
            "a"
        );
        assert_eq!(
            source.next_fragment().await.unwrap().unwrap().delta,
            "b"
        );
        assert!(source.next_fragment().await.unwrap().is_none());
    }

    #[test]
    fn test_fragment_usage_roundtrip() {
        let frag = StreamFragment::text("x").with_usage(TokenUsage {
            input_tokens: 10,
            output_tokens: 2,
        });
        let json = serde_json::to_string(&frag).unwrap();
        let parsed: StreamFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(frag, parsed);
    }
}
