//! Error types shared across Agentflow crates.

use thiserror::Error;

/// Errors from repository operations (used by trait definitions in
/// agentflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from tool registry invocations.
///
/// Tool failures are opaque to the engine; it records the message on the
/// step and applies the step's retry policy.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: '{0}'")]
    UnknownTool(String),

    #[error("tool error: {0}")]
    Invocation(String),
}

/// Errors from the inference backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference error: {0}")]
    Backend(String),

    #[error("invalid inference response: {0}")]
    InvalidResponse(String),
}
