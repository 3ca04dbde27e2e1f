//! Inference turn types for Agentflow.
//!
//! These types model the conversation shape the engine exchanges with the
//! inference backend when running an agent-turn step: a transcript of turn
//! messages going in, and either tool-call proposals or a final answer
//! coming back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Role of a message in an inference transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    /// A tool result fed back into the transcript.
    Tool,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::System => write!(f, "system"),
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in an inference transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub content: String,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
        }
    }
}

/// A tool invocation proposed by the model during an agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Registered tool name.
    pub name: String,
    /// Argument object for the invocation.
    pub arguments: Value,
}

/// What the model did with one inference turn.
#[derive(Debug, Clone)]
pub enum TurnAction {
    /// The model proposed one or more tool calls; results will be fed back.
    ToolCalls(Vec<ToolCallRequest>),
    /// The model produced its final answer; the turn loop ends.
    Answer(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
