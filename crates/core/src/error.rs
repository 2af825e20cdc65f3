//! Core Error Types
//!
//! Defines the foundational error types used across the DataPilot workspace.
//! These error types are dependency-free (only thiserror + serde_json + std)
//! to keep the core crate lightweight.
//!
//! Expected conditions have no variants here on purpose: an incomplete
//! streaming buffer is not an error (the tolerant parser returns `None`),
//! and a failed generation attempt inside the retry engine is recorded in
//! the attempt history rather than propagated.

use thiserror::Error;

/// Core error type for the DataPilot workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token stream source failures (the only fatal error of the planner loop)
    #[error("Stream error: {0}")]
    Stream(String),

    /// Code generation failures
    #[error("Generation error: {0}")]
    Generation(String),

    /// Validation failures (structural or semantic)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generated-code execution failures, message carries the full trace text
    #[error("Execution error: {0}")]
    Execution(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
