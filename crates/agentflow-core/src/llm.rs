//! Inference service trait definition.
//!
//! Two entry points: plain completion for `llm_inference` steps, and a
//! transcript-based turn for the `agent_turn` tool loop. Implementations
//! live in the infrastructure layer (provider HTTP clients); tests use
//! scripted stand-ins.

use agentflow_types::error::InferenceError;
use agentflow_types::llm::{TurnAction, TurnMessage};

/// Trait for LLM inference backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait InferenceService: Send + Sync {
    /// Run a single completion and return the generated text.
    fn complete(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> impl std::future::Future<Output = Result<String, InferenceError>> + Send;

    /// Run one agent turn against a transcript.
    ///
    /// `allowed_tools` carries the step's tool-name glob patterns so the
    /// backend can advertise only matching tools (empty = all tools).
    /// The engine independently enforces the same patterns on every
    /// proposal it executes.
    fn chat_turn(
        &self,
        transcript: &[TurnMessage],
        allowed_tools: &[String],
        model: Option<&str>,
    ) -> impl std::future::Future<Output = Result<TurnAction, InferenceError>> + Send;
}
