//! Engine Collaborator Contracts
//!
//! The retry engine's three external collaborators — code generator,
//! validator, and executor — plus the typed context bundle and the
//! opaque client-handle map handed to the execute phase. All three are
//! traits so the state machine can be exercised with scripted fakes.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use datapilot_core::table::ExecutionOutput;
use datapilot_core::CoreResult;

use crate::retry::GenerationAttempt;

// ============================================================================
// Client handles and input files
// ============================================================================

/// Named, opaque handles to data backends, passed read-only into the
/// execute phase. The engine neither opens nor closes them.
#[derive(Clone, Default)]
pub struct ClientHandles {
    handles: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ClientHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under a name. Replaces any existing handle.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, handle: Arc<T>) {
        self.handles.insert(name.into(), handle);
    }

    /// Look up a handle by name and concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .get(name)
            .cloned()
            .and_then(|handle| handle.downcast::<T>().ok())
    }

    pub fn names(&self) -> Vec<&str> {
        self.handles.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for ClientHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandles")
            .field("names", &self.names())
            .finish()
    }
}

/// A named input file made available to the generated code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputFile {
    pub name: String,
    pub path: PathBuf,
}

impl InputFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

// ============================================================================
// EngineContext
// ============================================================================

/// Typed context bundle for one retry-engine invocation. The alternative
/// to the legacy flat parameter list; both funnel into the same state
/// machine.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Data model description handed to the generator.
    pub data_model: Value,
    /// Prompt text describing the requested result.
    pub prompt: String,
    /// Data-source schema excerpt.
    pub schema_excerpt: Option<String>,
    /// Client handles for the execute phase.
    pub clients: ClientHandles,
    /// Input files for the execute phase.
    pub input_files: Vec<InputFile>,
    /// Retry budget for this invocation.
    pub max_retries: usize,
}

impl EngineContext {
    pub fn new(data_model: Value, prompt: impl Into<String>) -> Self {
        Self {
            data_model,
            prompt: prompt.into(),
            schema_excerpt: None,
            clients: ClientHandles::new(),
            input_files: Vec::new(),
            max_retries: crate::retry::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_schema_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.schema_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_clients(mut self, clients: ClientHandles) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_input_files(mut self, files: Vec<InputFile>) -> Self {
        self.input_files = files;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Input to one generate call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub data_model: Value,
    pub prompt: String,
    pub schema_excerpt: Option<String>,
    /// Ordered history of failed attempts so far.
    pub error_history: Vec<GenerationAttempt>,
    /// Zero-based index of the current attempt.
    pub retry_index: usize,
    /// Shared cancellation signal; generators may observe it cooperatively.
    pub cancellation: CancellationToken,
    /// The typed context bundle, when the invocation used one.
    pub context: Option<EngineContext>,
}

/// Produces code text for the requested result.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<String>;
}

/// Verdict of a validation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reasoning: String,
}

impl ValidationVerdict {
    pub fn pass() -> Self {
        Self {
            valid: true,
            reasoning: String::new(),
        }
    }

    pub fn reject(reasoning: impl Into<String>) -> Self {
        Self {
            valid: false,
            reasoning: reasoning.into(),
        }
    }
}

/// Judges generated code against the data model before execution.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, code: &str, data_model: &Value) -> CoreResult<ValidationVerdict>;
}

/// Runs generated code against client handles and input files.
///
/// Errors should carry the full trace text in their message.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        clients: &ClientHandles,
        input_files: &[InputFile],
    ) -> CoreResult<ExecutionOutput>;
}
