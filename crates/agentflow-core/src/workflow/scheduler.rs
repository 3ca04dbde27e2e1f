//! Frontier-based concurrent DAG execution.
//!
//! The scheduler drives one execution of a validated workflow: it keeps a
//! frontier of steps whose dependencies are all terminal, dispatches every
//! frontier step concurrently on a `JoinSet`, and folds results back into
//! the execution record as each task lands. A failed dependency blocks its
//! transitive dependents (they are recorded skipped without dispatching);
//! a condition skip does not block. The execution record in the repository
//! is re-persisted after every state change so external readers always see
//! a recent snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agentflow_types::workflow::{
    ExecutionStatus, StepStatus, WorkflowExecutionInfo, WorkflowInfo, WorkflowStep,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::llm::InferenceService;
use crate::repository::WorkflowRepository;
use crate::tool::ToolRegistry;

use super::condition::ConditionEvaluator;
use super::retry::{run_with_retries, AttemptReport};
use super::step_runner::{StepError, StepRunner};
use super::template::ExecutionContext;

/// Drives workflow executions to a terminal state.
///
/// One scheduler serves all executions; each `run` call owns a single
/// execution record for its lifetime. Live executions register a
/// cancellation token keyed by execution id, removed on completion.
pub struct WorkflowScheduler<R, T, I> {
    repository: Arc<R>,
    runner: StepRunner<T, I>,
    conditions: ConditionEvaluator,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<R, T, I> Clone for WorkflowScheduler<R, T, I> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            runner: self.runner.clone(),
            conditions: ConditionEvaluator::new(),
            cancellations: Arc::clone(&self.cancellations),
        }
    }
}

impl<R, T, I> WorkflowScheduler<R, T, I>
where
    R: WorkflowRepository + 'static,
    T: ToolRegistry + 'static,
    I: InferenceService + 'static,
{
    pub fn new(repository: Arc<R>, tools: Arc<T>, inference: Arc<I>) -> Self {
        Self {
            repository,
            runner: StepRunner::new(tools, inference),
            conditions: ConditionEvaluator::new(),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    /// Request cancellation of a live execution.
    ///
    /// Returns `false` if no execution with this id is currently running;
    /// already-terminal executions are unaffected.
    pub fn cancel(&self, execution_id: &Uuid) -> bool {
        match self.cancellations.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drive one execution to a terminal state.
    ///
    /// The caller has already created `execution` in the repository with
    /// status `Pending` and one slot per definition step.
    pub async fn run(
        &self,
        workflow: WorkflowInfo,
        mut execution: WorkflowExecutionInfo,
        variables: HashMap<String, Value>,
    ) {
        let cancel = CancellationToken::new();
        self.cancellations.insert(execution.id, cancel.clone());

        self.drive(&workflow, &mut execution, variables, &cancel)
            .await;

        self.cancellations.remove(&execution.id);
        self.persist(&execution).await;
        tracing::info!(
            execution = %execution.id,
            workflow = workflow.name.as_str(),
            status = ?execution.status,
            "execution finished"
        );
    }

    async fn drive(
        &self,
        workflow: &WorkflowInfo,
        execution: &mut WorkflowExecutionInfo,
        variables: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) {
        let steps_by_id: HashMap<&str, &WorkflowStep> = workflow
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();
        let slot_index: HashMap<String, usize> = execution
            .steps
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.step_id.clone(), i))
            .collect();

        let mut remaining: HashSet<String> =
            workflow.steps.iter().map(|s| s.id.clone()).collect();
        // Terminal statuses by step id; dependents dispatch only once every
        // dependency appears here.
        let mut terminal: HashMap<String, StepStatus> = HashMap::new();
        // Steps skipped because of an upstream failure. Membership
        // propagates to dependents; condition skips never enter this set.
        let mut blocked: HashSet<String> = HashSet::new();
        let mut ctx = ExecutionContext::new(variables);
        let mut tasks: JoinSet<(String, AttemptReport)> = JoinSet::new();
        // Task id -> step id, so a panicked task can still be attributed
        // to its slot.
        let mut task_ids: HashMap<tokio::task::Id, String> = HashMap::new();

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.persist(execution).await;

        loop {
            // Sweep the frontier until it stops moving. Skips make new
            // steps ready without any task landing, so one pass is not
            // enough.
            loop {
                let ready: Vec<String> = remaining
                    .iter()
                    .filter(|id| {
                        steps_by_id[id.as_str()]
                            .depends_on
                            .iter()
                            .all(|dep| terminal.contains_key(dep))
                    })
                    .cloned()
                    .collect();
                if ready.is_empty() {
                    break;
                }

                for id in ready {
                    remaining.remove(&id);
                    let step: &WorkflowStep = steps_by_id[id.as_str()];
                    let slot = &mut execution.steps[slot_index[&id]];

                    let blocking_dep = step.depends_on.iter().find(|dep| {
                        blocked.contains(dep.as_str())
                            || terminal.get(dep.as_str()) == Some(&StepStatus::Failed)
                    });
                    if let Some(dep) = blocking_dep {
                        let reason = if blocked.contains(dep.as_str()) {
                            format!("dependency '{dep}' was skipped")
                        } else {
                            format!("dependency '{dep}' failed")
                        };
                        tracing::info!(step = id.as_str(), %reason, "skipping blocked step");
                        slot.status = StepStatus::Skipped;
                        slot.error = Some(reason);
                        slot.completed_at = Some(Utc::now());
                        terminal.insert(id.clone(), StepStatus::Skipped);
                        blocked.insert(id);
                        continue;
                    }

                    if let Some(condition) = &step.condition {
                        if !self.conditions.should_run(condition, &ctx) {
                            tracing::info!(step = id.as_str(), "condition falsy, skipping step");
                            slot.status = StepStatus::Skipped;
                            slot.completed_at = Some(Utc::now());
                            terminal.insert(id, StepStatus::Skipped);
                            continue;
                        }
                    }

                    tracing::debug!(step = id.as_str(), "dispatching step");
                    slot.status = StepStatus::Running;
                    slot.started_at = Some(Utc::now());

                    let runner = self.runner.clone();
                    let step = step.clone();
                    let snapshot = ctx.clone();
                    let cancel = cancel.clone();
                    let handle = tasks.spawn(async move {
                        let report = run_with_retries(&runner, &step, &snapshot, &cancel).await;
                        (step.id, report)
                    });
                    task_ids.insert(handle.id(), id);
                }
                self.persist(execution).await;
            }

            if remaining.is_empty() && tasks.is_empty() {
                break;
            }

            if tasks.is_empty() {
                // Nothing in flight and nothing ready: the dependency
                // relation was not a validated DAG. Record the stall
                // rather than spin.
                let mut stalled: Vec<String> = remaining.drain().collect();
                stalled.sort();
                for id in &stalled {
                    let slot = &mut execution.steps[slot_index[id]];
                    slot.status = StepStatus::Skipped;
                    slot.error = Some("unreachable: dependencies never became terminal".to_string());
                    slot.completed_at = Some(Utc::now());
                }
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(format!(
                    "scheduler stalled with unreachable steps: {}",
                    stalled.join(", ")
                ));
                execution.completed_at = Some(Utc::now());
                tracing::error!(
                    execution = %execution.id,
                    steps = ?stalled,
                    "scheduler stalled, failing execution"
                );
                return;
            }

            if let Some(joined) = tasks.join_next_with_id().await {
                self.record_result(
                    execution,
                    &slot_index,
                    &mut terminal,
                    &mut ctx,
                    &mut task_ids,
                    joined,
                );
                self.persist(execution).await;
            }

            if cancel.is_cancelled() {
                // In-flight tasks observe the token at their next
                // suspension point; drain them, then finalize. Untouched
                // slots stay pending.
                while let Some(joined) = tasks.join_next_with_id().await {
                    self.record_result(
                        execution,
                        &slot_index,
                        &mut terminal,
                        &mut ctx,
                        &mut task_ids,
                        joined,
                    );
                }
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                tracing::info!(execution = %execution.id, "execution cancelled");
                return;
            }
        }

        let first_failure = execution
            .steps
            .iter()
            .find(|slot| slot.status == StepStatus::Failed);
        match first_failure {
            Some(slot) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(format!(
                    "step '{}' failed: {}",
                    slot.step_id,
                    slot.error.as_deref().unwrap_or("unknown error")
                ));
            }
            None => execution.status = ExecutionStatus::Completed,
        }
        execution.completed_at = Some(Utc::now());
    }

    /// Fold one landed task back into the execution record and context.
    fn record_result(
        &self,
        execution: &mut WorkflowExecutionInfo,
        slot_index: &HashMap<String, usize>,
        terminal: &mut HashMap<String, StepStatus>,
        ctx: &mut ExecutionContext,
        task_ids: &mut HashMap<tokio::task::Id, String>,
        joined: Result<(tokio::task::Id, (String, AttemptReport)), tokio::task::JoinError>,
    ) {
        let (step_id, report) = match joined {
            Ok((task_id, pair)) => {
                task_ids.remove(&task_id);
                pair
            }
            Err(e) => {
                // A panicked collaborator is a step failure, not a lost
                // slot; the task id recovers which step it was.
                let Some(step_id) = task_ids.remove(&e.id()) else {
                    tracing::error!(error = %e, "step task failed with no registered id");
                    return;
                };
                let detail = if e.is_panic() {
                    let payload = e.into_panic();
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string())
                } else {
                    e.to_string()
                };
                tracing::error!(
                    step = step_id.as_str(),
                    detail = detail.as_str(),
                    "step task panicked"
                );
                let slot = &mut execution.steps[slot_index[&step_id]];
                slot.status = StepStatus::Failed;
                slot.error = Some(format!("step task panicked: {detail}"));
                slot.completed_at = Some(Utc::now());
                terminal.insert(step_id, StepStatus::Failed);
                return;
            }
        };

        let slot = &mut execution.steps[slot_index[&step_id]];
        slot.attempts = report.attempts;
        slot.completed_at = Some(Utc::now());
        match report.result {
            Ok(output) => {
                slot.status = StepStatus::Completed;
                slot.output = Some(output.clone());
                ctx.set_step_output(&step_id, output);
            }
            Err(StepError::Cancelled) => {
                slot.status = StepStatus::Skipped;
                slot.error = Some("execution cancelled".to_string());
            }
            Err(err) => {
                tracing::warn!(step = step_id.as_str(), error = %err, "step failed");
                slot.status = StepStatus::Failed;
                slot.error = Some(err.to_string());
            }
        }
        terminal.insert(step_id, slot.status);
    }

    async fn persist(&self, execution: &WorkflowExecutionInfo) {
        if let Err(e) = self.repository.update_execution(execution).await {
            tracing::error!(
                execution = %execution.id,
                error = %e,
                "failed to persist execution snapshot"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
