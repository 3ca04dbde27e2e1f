//! Workflow domain types for Agentflow.
//!
//! Defines the canonical representation of a workflow (a DAG of steps),
//! plus the execution tracking records (`WorkflowExecutionInfo`,
//! `WorkflowStepExecutionInfo`) created for each run. Field names
//! serialize in camelCase so records round-trip against the platform's
//! JSON protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Step
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
///
/// Shared scheduling fields live on the struct; the variant-specific
/// payload is flattened in via [`StepPayload`], tagged by `type`:
///
/// ```json
/// {
///   "id": "send",
///   "name": "Send Email",
///   "dependsOn": ["draft"],
///   "type": "tool_call",
///   "toolName": "gmail.send",
///   "arguments": { "body": "{{steps.draft.output}}" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// User-defined step ID. Unique within a workflow, referenced by
    /// `depends_on` entries and template expressions.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Step IDs that must reach a terminal state before this step runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional expression over resolved step outputs -- skip if falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Max retries after the first failed attempt (default 0).
    #[serde(default)]
    pub retry_max: u32,
    /// Fixed backoff between retries in milliseconds (default 1000).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Variant-specific payload.
    #[serde(flatten)]
    pub payload: StepPayload,
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl WorkflowStep {
    /// The kind of step, derived from the payload variant.
    pub fn step_type(&self) -> StepType {
        match self.payload {
            StepPayload::ToolCall { .. } => StepType::ToolCall,
            StepPayload::LlmInference { .. } => StepType::LlmInference,
            StepPayload::Delay { .. } => StepType::Delay,
            StepPayload::AgentTurn { .. } => StepType::AgentTurn,
        }
    }
}

/// Variant-specific step payload, internally tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    /// Invoke a registered tool with an argument object. String leaves of
    /// the argument object may contain `{{...}}` template expressions.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// Registered tool name (e.g. "gmail.send").
        tool_name: String,
        /// Tool arguments; resolved against the execution context.
        arguments: Value,
    },
    /// Single LLM completion; the generated text becomes the step output.
    #[serde(rename_all = "camelCase")]
    LlmInference {
        /// Prompt text, may contain `{{...}}` template expressions.
        prompt: String,
        /// Optional model override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Fixed wait; always completes unless the execution is cancelled.
    #[serde(rename_all = "camelCase")]
    Delay {
        /// Wait duration in milliseconds.
        duration_ms: u64,
    },
    /// Bounded sub-agent loop: inference proposes tool calls, the engine
    /// executes the allowed ones and feeds results back, until the model
    /// answers or `max_turns` is reached.
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        /// Goal prompt for the sub-agent.
        prompt: String,
        /// Optional model override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Tool name glob patterns the sub-agent may use. Empty = all tools.
        #[serde(default)]
        allowed_tools: Vec<String>,
        /// Max inference turns before forcing stop (default 5).
        #[serde(default = "default_max_turns")]
        max_turns: u32,
    },
}

fn default_max_turns() -> u32 {
    5
}

/// The kind of step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    ToolCall,
    LlmInference,
    Delay,
    AgentTurn,
}

// ---------------------------------------------------------------------------
// Workflow definition record
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Archived,
}

/// A stored workflow definition.
///
/// Mutated only by explicit create/update/delete operations. Archived
/// workflows may still be read but not executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInfo {
    /// UUIDv7 assigned on create.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Ordered list of steps forming the workflow DAG.
    pub steps: Vec<WorkflowStep>,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When the workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Overall status of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transition occurs from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of an individual step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether no further transition occurs from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// What caused an execution to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTrigger {
    Manual,
    Schedule,
    Tool,
}

/// One execution instance of a workflow.
///
/// Created once per execute request, never reused across runs. The step
/// slot list is fixed at execution start (one slot per definition step,
/// in definition order); no slots are inserted mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionInfo {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    /// Workflow name, denormalized for display.
    pub workflow_name: String,
    /// Current execution status.
    pub status: ExecutionStatus,
    /// What triggered this execution.
    pub trigger: WorkflowTrigger,
    /// Per-step execution slots, fixed at start.
    pub steps: Vec<WorkflowStepExecutionInfo>,
    /// When the first step was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Top-level error for failed executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution state for a single step slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepExecutionInfo {
    /// Step ID matching `WorkflowStep.id`.
    pub step_id: String,
    /// Step name, denormalized for display.
    pub name: String,
    /// The kind of step.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Current step status.
    pub status: StepStatus,
    /// Opaque output value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch attempts performed, including the final one.
    pub attempts: u32,
    /// When the step was first dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStepExecutionInfo {
    /// Build the initial pending slot for a definition step.
    pub fn pending(step: &WorkflowStep) -> Self {
        Self {
            step_id: step.id.clone(),
            name: step.name.clone(),
            step_type: step.step_type(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
