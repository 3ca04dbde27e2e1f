//! Workflow CRUD and execution surface.
//!
//! `WorkflowService` is the single entry point callers use: definition
//! CRUD (validated against the DAG rules before anything is stored),
//! execute (fire-and-return, the run continues on a detached task), and
//! execution queries and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{
    ExecutionStatus, WorkflowExecutionInfo, WorkflowInfo, WorkflowStatus, WorkflowStep,
    WorkflowStepExecutionInfo, WorkflowTrigger,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::llm::InferenceService;
use crate::repository::WorkflowRepository;
use crate::tool::ToolRegistry;

use super::dag::{validate_steps, GraphError};
use super::scheduler::WorkflowScheduler;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("workflow is archived and cannot be executed")]
    Archived,

    #[error("execution already reached a terminal status")]
    NotRunning,

    #[error(transparent)]
    InvalidGraph(#[from] GraphError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Update payload
// ---------------------------------------------------------------------------

/// Partial update for a stored workflow definition. Absent fields keep
/// their current value; a new step list is re-validated before replacing
/// the old one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub status: Option<WorkflowStatus>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Workflow definition CRUD plus the execute/cancel surface.
pub struct WorkflowService<R, T, I> {
    repository: Arc<R>,
    scheduler: WorkflowScheduler<R, T, I>,
}

impl<R, T, I> Clone for WorkflowService<R, T, I> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<R, T, I> WorkflowService<R, T, I>
where
    R: WorkflowRepository + 'static,
    T: ToolRegistry + 'static,
    I: InferenceService + 'static,
{
    pub fn new(repository: Arc<R>, tools: Arc<T>, inference: Arc<I>) -> Self {
        let scheduler = WorkflowScheduler::new(Arc::clone(&repository), tools, inference);
        Self {
            repository,
            scheduler,
        }
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Create a workflow definition. The step list must form a valid DAG;
    /// invalid definitions are rejected without storing anything.
    pub async fn create_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Result<WorkflowInfo, ServiceError> {
        validate_steps(&steps)?;

        let now = Utc::now();
        let workflow = WorkflowInfo {
            id: Uuid::now_v7(),
            name: name.into(),
            description: description.into(),
            steps,
            status: WorkflowStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.repository.save_workflow(&workflow).await?;
        tracing::info!(workflow = %workflow.id, name = workflow.name.as_str(), "workflow created");
        Ok(workflow)
    }

    /// Apply a partial update to a workflow definition.
    ///
    /// Executions already in flight keep the step list they started with.
    pub async fn update_workflow(
        &self,
        id: &Uuid,
        update: WorkflowUpdate,
    ) -> Result<WorkflowInfo, ServiceError> {
        let mut workflow = self
            .repository
            .get_workflow(id)
            .await?
            .ok_or(ServiceError::WorkflowNotFound(*id))?;

        if let Some(steps) = update.steps {
            validate_steps(&steps)?;
            workflow.steps = steps;
        }
        if let Some(name) = update.name {
            workflow.name = name;
        }
        if let Some(description) = update.description {
            workflow.description = description;
        }
        if let Some(status) = update.status {
            workflow.status = status;
        }
        workflow.updated_at = Utc::now();

        self.repository.save_workflow(&workflow).await?;
        tracing::info!(workflow = %workflow.id, "workflow updated");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &Uuid) -> Result<WorkflowInfo, ServiceError> {
        self.repository
            .get_workflow(id)
            .await?
            .ok_or(ServiceError::WorkflowNotFound(*id))
    }

    pub async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowInfo>, ServiceError> {
        Ok(self.repository.list_workflows(status).await?)
    }

    /// Delete a workflow definition. Past execution records survive the
    /// deletion of their definition.
    pub async fn delete_workflow(&self, id: &Uuid) -> Result<(), ServiceError> {
        if self.repository.delete_workflow(id).await? {
            tracing::info!(workflow = %id, "workflow deleted");
            Ok(())
        } else {
            Err(ServiceError::WorkflowNotFound(*id))
        }
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Start an execution and return its id immediately.
    ///
    /// The run continues on a detached task; callers observe progress by
    /// polling [`get_execution`](Self::get_execution).
    pub async fn execute(
        &self,
        workflow_id: &Uuid,
        trigger: WorkflowTrigger,
        variables: HashMap<String, Value>,
    ) -> Result<Uuid, ServiceError> {
        let workflow = self.get_workflow(workflow_id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(ServiceError::Archived);
        }

        let execution = WorkflowExecutionInfo {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Pending,
            trigger,
            steps: workflow
                .steps
                .iter()
                .map(WorkflowStepExecutionInfo::pending)
                .collect(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        let execution_id = execution.id;
        self.repository.create_execution(&execution).await?;

        tracing::info!(
            execution = %execution_id,
            workflow = %workflow.id,
            ?trigger,
            "execution started"
        );
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.run(workflow, execution, variables).await;
        });

        Ok(execution_id)
    }

    pub async fn get_execution(
        &self,
        id: &Uuid,
    ) -> Result<WorkflowExecutionInfo, ServiceError> {
        self.repository
            .get_execution(id)
            .await?
            .ok_or(ServiceError::ExecutionNotFound(*id))
    }

    pub async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowExecutionInfo>, ServiceError> {
        Ok(self.repository.list_executions(workflow_id).await?)
    }

    /// Request cancellation of a running execution.
    ///
    /// Cancellation is cooperative; the record reaches `cancelled` once
    /// in-flight steps observe the token.
    pub async fn cancel_execution(&self, id: &Uuid) -> Result<(), ServiceError> {
        if self.scheduler.cancel(id) {
            return Ok(());
        }
        // No live run with this id: distinguish "finished" from "never
        // existed".
        match self.repository.get_execution(id).await? {
            Some(_) => Err(ServiceError::NotRunning),
            None => Err(ServiceError::ExecutionNotFound(*id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
