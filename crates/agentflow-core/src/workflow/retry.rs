//! Bounded retry-with-backoff around one step's dispatch.
//!
//! Retries are per step: `retry_max` additional attempts after the first,
//! with a fixed `retry_backoff_ms` pause between attempts. Only collaborator
//! failures (tool, inference) are retried; resolution errors and
//! cancellation short-circuit. The backoff sleep itself is cancellable.

use std::time::Duration;

use agentflow_types::workflow::WorkflowStep;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::InferenceService;
use crate::tool::ToolRegistry;

use super::step_runner::{StepError, StepRunner};
use super::template::ExecutionContext;

/// The final result of a step after its retry budget, with the total
/// number of dispatch attempts actually made.
pub struct AttemptReport {
    pub result: Result<Value, StepError>,
    pub attempts: u32,
}

/// Run a step through its retry budget.
///
/// Each attempt is a full dispatch, including template re-resolution.
pub async fn run_with_retries<T: ToolRegistry, I: InferenceService>(
    runner: &StepRunner<T, I>,
    step: &WorkflowStep,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
) -> AttemptReport {
    let max_attempts = step.retry_max.saturating_add(1);

    for attempt in 1..=max_attempts {
        match runner.run(step, ctx, cancel).await {
            Ok(output) => {
                return AttemptReport {
                    result: Ok(output),
                    attempts: attempt,
                };
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    step = step.id.as_str(),
                    attempt,
                    max_attempts,
                    error = %err,
                    "step attempt failed, backing off before retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return AttemptReport {
                            result: Err(StepError::Cancelled),
                            attempts: attempt,
                        };
                    }
                    _ = tokio::time::sleep(Duration::from_millis(step.retry_backoff_ms)) => {}
                }
            }
            Err(err) => {
                return AttemptReport {
                    result: Err(err),
                    attempts: attempt,
                };
            }
        }
    }

    // retry_max is finite, so the loop always returns; this is the
    // max_attempts == 0 impossibility guard.
    AttemptReport {
        result: Err(StepError::Tool("no attempts made".to_string())),
        attempts: 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::error::{InferenceError, ToolError};
    use agentflow_types::llm::{TurnAction, TurnMessage};
    use agentflow_types::workflow::StepPayload;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `fail_first` invocations, then succeeds.
    struct FlakyTools {
        fail_first: u32,
        invocations: AtomicU32,
    }

    impl FlakyTools {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                invocations: AtomicU32::new(0),
            }
        }
    }

    impl ToolRegistry for FlakyTools {
        async fn invoke(&self, _name: &str, _args: &Value) -> Result<Value, ToolError> {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(ToolError::Invocation(format!("transient failure {n}")))
            } else {
                Ok(json!({ "succeededOn": n }))
            }
        }
    }

    struct NoInference;

    impl InferenceService for NoInference {
        async fn complete(
            &self,
            _prompt: &str,
            _model: Option<&str>,
        ) -> Result<String, InferenceError> {
            Err(InferenceError::Backend("unused".to_string()))
        }

        async fn chat_turn(
            &self,
            _transcript: &[TurnMessage],
            _allowed_tools: &[String],
            _model: Option<&str>,
        ) -> Result<TurnAction, InferenceError> {
            Err(InferenceError::Backend("unused".to_string()))
        }
    }

    fn tool_step(retry_max: u32, arguments: Value) -> WorkflowStep {
        WorkflowStep {
            id: "flaky".to_string(),
            name: "Flaky".to_string(),
            depends_on: vec![],
            condition: None,
            retry_max,
            retry_backoff_ms: 50,
            payload: StepPayload::ToolCall {
                tool_name: "flaky.call".to_string(),
                arguments,
            },
        }
    }

    fn make_runner(fail_first: u32) -> (StepRunner<FlakyTools, NoInference>, Arc<FlakyTools>) {
        let tools = Arc::new(FlakyTools::new(fail_first));
        let runner = StepRunner::new(Arc::clone(&tools), Arc::new(NoInference));
        (runner, tools)
    }

    #[tokio::test]
    async fn test_first_attempt_success_uses_no_retries() {
        let (runner, tools) = make_runner(0);
        let step = tool_step(3, json!({}));
        let ctx = ExecutionContext::new(HashMap::new());

        let report = run_with_retries(&runner, &step, &ctx, &CancellationToken::new()).await;
        assert!(report.result.is_ok());
        assert_eq!(report.attempts, 1);
        assert_eq!(tools.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_budget() {
        let (runner, tools) = make_runner(2);
        let step = tool_step(2, json!({}));
        let ctx = ExecutionContext::new(HashMap::new());

        let report = run_with_retries(&runner, &step, &ctx, &CancellationToken::new()).await;
        assert_eq!(report.result.unwrap()["succeededOn"], 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(tools.invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_reports_last_error() {
        // retry_max = 2 means exactly three attempts, then the failure
        // surfaces.
        let (runner, tools) = make_runner(u32::MAX);
        let step = tool_step(2, json!({}));
        let ctx = ExecutionContext::new(HashMap::new());

        let report = run_with_retries(&runner, &step, &ctx, &CancellationToken::new()).await;
        let err = report.result.unwrap_err();
        assert!(err.to_string().contains("transient failure 3"));
        assert_eq!(report.attempts, 3);
        assert_eq!(tools.invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolution_error_is_not_retried() {
        let (runner, tools) = make_runner(0);
        let step = tool_step(5, json!({ "x": "{{steps.ghost.output}}" }));
        let ctx = ExecutionContext::new(HashMap::new());

        let report = run_with_retries(&runner, &step, &ctx, &CancellationToken::new()).await;
        assert!(matches!(report.result, Err(StepError::Resolution(_))));
        assert_eq!(report.attempts, 1);
        assert_eq!(tools.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let (runner, _) = make_runner(u32::MAX);
        let mut step = tool_step(5, json!({}));
        step.retry_backoff_ms = 60_000;
        let ctx = ExecutionContext::new(HashMap::new());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let report = run_with_retries(&runner, &step, &ctx, &cancel).await;
        assert!(matches!(report.result, Err(StepError::Cancelled)));
        assert_eq!(report.attempts, 1);
    }
}
