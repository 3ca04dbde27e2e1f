//! Step dispatch for the four workflow step types.
//!
//! `StepRunner` resolves a step's templates against the execution context
//! and dispatches by payload variant: tool calls and inference go to the
//! collaborator ports, delays suspend on the timer, and agent turns run a
//! bounded inner tool loop. Collaborator failures are captured into a
//! `StepError` -- dispatch never panics across step types, and every
//! suspension point honors the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use agentflow_types::llm::{TurnAction, TurnMessage};
use agentflow_types::workflow::{StepPayload, WorkflowStep};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::llm::InferenceService;
use crate::tool::ToolRegistry;

use super::template::{ExecutionContext, TemplateError};

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors from one dispatch attempt.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A template or condition reference could not be resolved.
    /// Never retried: re-resolution against the same context cannot succeed.
    #[error("template resolution failed: {0}")]
    Resolution(#[from] TemplateError),

    /// A tool registry invocation failed.
    #[error("tool call failed: {0}")]
    Tool(String),

    /// The inference backend failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The execution was cancelled while this step was suspended.
    #[error("execution cancelled")]
    Cancelled,
}

impl StepError {
    /// Whether the step's retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Tool(_) | StepError::Inference(_))
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Dispatches individual workflow steps through the collaborator ports.
pub struct StepRunner<T, I> {
    tools: Arc<T>,
    inference: Arc<I>,
}

impl<T, I> Clone for StepRunner<T, I> {
    fn clone(&self) -> Self {
        Self {
            tools: Arc::clone(&self.tools),
            inference: Arc::clone(&self.inference),
        }
    }
}

impl<T: ToolRegistry, I: InferenceService> StepRunner<T, I> {
    /// Create a new step runner over the shared collaborators.
    pub fn new(tools: Arc<T>, inference: Arc<I>) -> Self {
        Self { tools, inference }
    }

    /// Run one dispatch attempt for a step.
    ///
    /// Templates are resolved here, once per attempt, so retries
    /// re-resolve against the (by then fixed) context.
    pub async fn run(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        match &step.payload {
            StepPayload::ToolCall {
                tool_name,
                arguments,
            } => self.run_tool_call(tool_name, arguments, ctx, cancel).await,
            StepPayload::LlmInference { prompt, model } => {
                self.run_inference(prompt, model.as_deref(), ctx, cancel).await
            }
            StepPayload::Delay { duration_ms } => run_delay(*duration_ms, cancel).await,
            StepPayload::AgentTurn {
                prompt,
                model,
                allowed_tools,
                max_turns,
            } => {
                self.run_agent_turn(
                    prompt,
                    model.as_deref(),
                    allowed_tools,
                    *max_turns,
                    ctx,
                    cancel,
                )
                .await
            }
        }
    }

    // -- tool_call: resolve argument object, invoke the registry --

    async fn run_tool_call(
        &self,
        tool_name: &str,
        arguments: &Value,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let resolved = ctx.resolve_value(arguments)?;
        tracing::debug!(tool = tool_name, "dispatching tool call");

        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            result = self.tools.invoke(tool_name, &resolved) => {
                result.map_err(|e| StepError::Tool(e.to_string()))
            }
        }
    }

    // -- llm_inference: resolve prompt, single completion --

    async fn run_inference(
        &self,
        prompt: &str,
        model: Option<&str>,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let resolved = ctx.resolve_str(prompt)?;
        tracing::debug!(model = model.unwrap_or("default"), "dispatching inference");

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            result = self.inference.complete(&resolved, model) => {
                result.map_err(|e| StepError::Inference(e.to_string()))?
            }
        };
        Ok(Value::String(text))
    }

    // -- agent_turn: bounded inner tool loop --

    async fn run_agent_turn(
        &self,
        prompt: &str,
        model: Option<&str>,
        allowed_tools: &[String],
        max_turns: u32,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let goal = ctx.resolve_str(prompt)?;
        let mut transcript = vec![TurnMessage::user(goal)];
        let mut answer = String::new();
        let mut turn_limited = true;
        let mut turns = 0u32;

        for turn in 1..=max_turns.max(1) {
            turns = turn;
            let action = tokio::select! {
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                result = self.inference.chat_turn(&transcript, allowed_tools, model) => {
                    result.map_err(|e| StepError::Inference(e.to_string()))?
                }
            };

            match action {
                TurnAction::Answer(text) => {
                    answer = text;
                    turn_limited = false;
                    break;
                }
                TurnAction::ToolCalls(calls) => {
                    transcript.push(TurnMessage::assistant(
                        serde_json::to_string(&calls).unwrap_or_default(),
                    ));
                    for call in calls {
                        if !tool_allowed(&call.name, allowed_tools) {
                            tracing::warn!(
                                tool = call.name.as_str(),
                                "agent turn proposed a tool outside the allow-list"
                            );
                            transcript.push(TurnMessage::tool(format!(
                                "tool '{}' is not permitted for this step",
                                call.name
                            )));
                            continue;
                        }

                        let result = tokio::select! {
                            _ = cancel.cancelled() => return Err(StepError::Cancelled),
                            result = self.tools.invoke(&call.name, &call.arguments) => result,
                        };
                        transcript.push(match result {
                            Ok(value) => TurnMessage::tool(
                                serde_json::to_string(&value).unwrap_or_default(),
                            ),
                            Err(e) => {
                                TurnMessage::tool(format!("tool '{}' failed: {e}", call.name))
                            }
                        });
                    }
                }
            }
        }

        if turn_limited {
            tracing::warn!(turns, "agent turn hit its turn limit before answering");
        }

        Ok(json!({
            "answer": answer,
            "turns": turns,
            "turnLimited": turn_limited,
        }))
    }
}

// -- delay: timer suspension, wakes early on cancellation --

async fn run_delay(duration_ms: u64, cancel: &CancellationToken) -> Result<Value, StepError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {
            Ok(json!({ "delayedMs": duration_ms }))
        }
    }
}

// ---------------------------------------------------------------------------
// Glob matching
// ---------------------------------------------------------------------------

/// Whether a tool name passes the step's allow-list. Empty = unrestricted.
fn tool_allowed(name: &str, patterns: &[String]) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob_match(p, name))
}

/// Minimal glob matching over tool names: `*` matches any run of
/// characters, `?` matches exactly one. Covers patterns like `gmail.*`
/// without pulling in a glob crate.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((b'*', rest)) => inner(rest, t) || (!t.is_empty() && inner(p, &t[1..])),
            Some((b'?', rest)) => !t.is_empty() && inner(rest, &t[1..]),
            Some((c, rest)) => t.first() == Some(c) && inner(rest, &t[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::error::{InferenceError, ToolError};
    use agentflow_types::llm::ToolCallRequest;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    fn test_step(payload: StepPayload) -> WorkflowStep {
        WorkflowStep {
            id: "test".to_string(),
            name: "Test".to_string(),
            depends_on: vec![],
            condition: None,
            retry_max: 0,
            retry_backoff_ms: 1000,
            payload,
        }
    }

    /// Tool registry that records invocations and optionally fails.
    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<(String, Value)>>,
        fail_with: Option<String>,
    }

    impl ToolRegistry for RecordingTools {
        async fn invoke(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), args.clone()));
            match &self.fail_with {
                Some(msg) => Err(ToolError::Invocation(msg.clone())),
                None => Ok(json!({ "tool": name, "ok": true })),
            }
        }
    }

    /// Inference backend that serves a scripted sequence of turn actions.
    struct ScriptedInference {
        actions: Mutex<VecDeque<TurnAction>>,
        turns_served: Mutex<u32>,
    }

    impl ScriptedInference {
        fn new(actions: Vec<TurnAction>) -> Self {
            Self {
                actions: Mutex::new(actions.into()),
                turns_served: Mutex::new(0),
            }
        }

        fn turns_served(&self) -> u32 {
            *self.turns_served.lock().unwrap()
        }
    }

    impl InferenceService for ScriptedInference {
        async fn complete(
            &self,
            prompt: &str,
            _model: Option<&str>,
        ) -> Result<String, InferenceError> {
            Ok(format!("echo: {prompt}"))
        }

        async fn chat_turn(
            &self,
            _transcript: &[TurnMessage],
            _allowed_tools: &[String],
            _model: Option<&str>,
        ) -> Result<TurnAction, InferenceError> {
            *self.turns_served.lock().unwrap() += 1;
            self.actions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InferenceError::Backend("script exhausted".to_string()))
        }
    }

    fn runner(
        tools: RecordingTools,
        inference: ScriptedInference,
    ) -> (
        StepRunner<RecordingTools, ScriptedInference>,
        Arc<RecordingTools>,
        Arc<ScriptedInference>,
    ) {
        let tools = Arc::new(tools);
        let inference = Arc::new(inference);
        (
            StepRunner::new(Arc::clone(&tools), Arc::clone(&inference)),
            tools,
            inference,
        )
    }

    fn empty_ctx() -> ExecutionContext {
        ExecutionContext::new(HashMap::new())
    }

    // -------------------------------------------------------------------
    // tool_call
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_tool_call_resolves_arguments() {
        let (runner, tools, _) = runner(RecordingTools::default(), ScriptedInference::new(vec![]));
        let mut ctx = empty_ctx();
        ctx.set_step_output("draft", json!({ "text": "hello" }));

        let step = test_step(StepPayload::ToolCall {
            tool_name: "gmail.send".to_string(),
            arguments: json!({ "body": "{{steps.draft.output.text}}" }),
        });

        let output = runner.run(&step, &ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(output["ok"], true);

        let calls = tools.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gmail.send");
        assert_eq!(calls[0].1["body"], "hello");
    }

    #[tokio::test]
    async fn test_tool_call_failure_is_captured() {
        let (runner, _, _) = runner(
            RecordingTools {
                fail_with: Some("SMTP timeout".to_string()),
                ..Default::default()
            },
            ScriptedInference::new(vec![]),
        );
        let step = test_step(StepPayload::ToolCall {
            tool_name: "gmail.send".to_string(),
            arguments: json!({}),
        });

        let err = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Tool(_)));
        assert!(err.to_string().contains("SMTP timeout"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unresolvable_argument_is_resolution_error() {
        let (runner, tools, _) = runner(RecordingTools::default(), ScriptedInference::new(vec![]));
        let step = test_step(StepPayload::ToolCall {
            tool_name: "gmail.send".to_string(),
            arguments: json!({ "body": "{{steps.ghost.output}}" }),
        });

        let err = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Resolution(_)));
        assert!(!err.is_retryable());
        // The registry must never be reached.
        assert!(tools.calls.lock().unwrap().is_empty());
    }

    // -------------------------------------------------------------------
    // llm_inference
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_inference_output_is_generated_text() {
        let (runner, _, _) = runner(RecordingTools::default(), ScriptedInference::new(vec![]));
        let mut ctx = empty_ctx();
        ctx.set_step_output("gather", json!("three items"));

        let step = test_step(StepPayload::LlmInference {
            prompt: "Summarize: {{steps.gather.output}}".to_string(),
            model: None,
        });

        let output = runner.run(&step, &ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(output, json!("echo: Summarize: three items"));
    }

    // -------------------------------------------------------------------
    // delay
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_delay_completes() {
        let (runner, _, _) = runner(RecordingTools::default(), ScriptedInference::new(vec![]));
        let step = test_step(StepPayload::Delay { duration_ms: 5 });
        let output = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["delayedMs"], 5);
    }

    #[tokio::test]
    async fn test_delay_wakes_early_on_cancellation() {
        let (runner, _, _) = runner(RecordingTools::default(), ScriptedInference::new(vec![]));
        let step = test_step(StepPayload::Delay { duration_ms: 60_000 });
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run(&step, &empty_ctx(), &cancel).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // -------------------------------------------------------------------
    // agent_turn
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_agent_turn_tool_loop_then_answer() {
        let (runner, tools, inference) = runner(
            RecordingTools::default(),
            ScriptedInference::new(vec![
                TurnAction::ToolCalls(vec![ToolCallRequest {
                    name: "web.search".to_string(),
                    arguments: json!({ "query": "rust" }),
                }]),
                TurnAction::Answer("all done".to_string()),
            ]),
        );

        let step = test_step(StepPayload::AgentTurn {
            prompt: "research rust".to_string(),
            model: None,
            allowed_tools: vec![],
            max_turns: 5,
        });

        let output = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["answer"], "all done");
        assert_eq!(output["turns"], 2);
        assert_eq!(output["turnLimited"], false);
        assert_eq!(inference.turns_served(), 2);
        assert_eq!(tools.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_turn_respects_max_turns() {
        // The model never answers; with max_turns = 1 exactly one inference
        // round runs and the step still succeeds, marked turn-limited.
        let (runner, _, inference) = runner(
            RecordingTools::default(),
            ScriptedInference::new(vec![
                TurnAction::ToolCalls(vec![ToolCallRequest {
                    name: "web.search".to_string(),
                    arguments: json!({}),
                }]),
                TurnAction::ToolCalls(vec![]),
            ]),
        );

        let step = test_step(StepPayload::AgentTurn {
            prompt: "never stops".to_string(),
            model: None,
            allowed_tools: vec![],
            max_turns: 1,
        });

        let output = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["turns"], 1);
        assert_eq!(output["turnLimited"], true);
        assert_eq!(inference.turns_served(), 1);
    }

    #[tokio::test]
    async fn test_agent_turn_blocks_disallowed_tools() {
        let (runner, tools, _) = runner(
            RecordingTools::default(),
            ScriptedInference::new(vec![
                TurnAction::ToolCalls(vec![ToolCallRequest {
                    name: "shell.exec".to_string(),
                    arguments: json!({}),
                }]),
                TurnAction::Answer("stopped".to_string()),
            ]),
        );

        let step = test_step(StepPayload::AgentTurn {
            prompt: "send mail".to_string(),
            model: None,
            allowed_tools: vec!["gmail.*".to_string()],
            max_turns: 5,
        });

        let output = runner
            .run(&step, &empty_ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["answer"], "stopped");
        // The disallowed proposal never reaches the registry.
        assert!(tools.calls.lock().unwrap().is_empty());
    }

    // -------------------------------------------------------------------
    // Glob matching
    // -------------------------------------------------------------------

    #[test]
    fn test_glob_match() {
        assert!(glob_match("gmail.*", "gmail.send"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("web.search", "web.search"));
        assert!(glob_match("g?ail.send", "gmail.send"));
        assert!(!glob_match("gmail.*", "slack.post"));
        assert!(!glob_match("gmail", "gmail.send"));
    }

    #[test]
    fn test_tool_allowed_empty_is_unrestricted() {
        assert!(tool_allowed("anything.at.all", &[]));
        assert!(tool_allowed("gmail.send", &["slack.*".to_string(), "gmail.*".to_string()]));
        assert!(!tool_allowed("gmail.send", &["slack.*".to_string()]));
    }
}
