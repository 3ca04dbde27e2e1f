//! Tool registry trait definition.
//!
//! The engine never implements tools itself; it dispatches `tool_call`
//! steps and agent-turn proposals through this port. Implementations are
//! shared, reentrant collaborators responsible for their own concurrency
//! limits -- the scheduler holds no locks across an invocation.

use agentflow_types::error::ToolError;
use serde_json::Value;

/// Trait for tool execution backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ToolRegistry: Send + Sync {
    /// Invoke a registered tool by name with a resolved argument object.
    ///
    /// The returned value is opaque to the engine; it becomes the step's
    /// output (or, inside an agent turn, a tool result fed back to the
    /// model).
    fn invoke(
        &self,
        name: &str,
        args: &Value,
    ) -> impl std::future::Future<Output = Result<Value, ToolError>> + Send;
}
