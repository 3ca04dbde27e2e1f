//! In-memory workflow repository backed by `DashMap`.
//!
//! Holds definitions and execution records in two concurrent maps.
//! Values are cloned on read so no `DashMap` guard is ever held across
//! an `.await` point. Records do not survive process restart; the
//! repository port keeps a durable backend swappable without touching
//! the engine.

use std::sync::Arc;

use agentflow_core::repository::WorkflowRepository;
use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{WorkflowExecutionInfo, WorkflowInfo, WorkflowStatus};
use dashmap::DashMap;
use uuid::Uuid;

/// Concurrent in-memory store for workflow definitions and executions.
///
/// Cloning produces a shared view of the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkflowRepository {
    workflows: Arc<DashMap<Uuid, WorkflowInfo>>,
    executions: Arc<DashMap<Uuid, WorkflowExecutionInfo>>,
}

impl MemoryWorkflowRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save_workflow(&self, workflow: &WorkflowInfo) -> Result<(), RepositoryError> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowInfo>, RepositoryError> {
        Ok(self.workflows.get(id).map(|r| r.value().clone()))
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowInfo>, RepositoryError> {
        let mut workflows: Vec<WorkflowInfo> = self
            .workflows
            .iter()
            .filter(|r| status.is_none_or(|s| r.value().status == s))
            .map(|r| r.value().clone())
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.workflows.remove(id).is_some())
    }

    async fn create_execution(
        &self,
        execution: &WorkflowExecutionInfo,
    ) -> Result<(), RepositoryError> {
        if self.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(
        &self,
        execution: &WorkflowExecutionInfo,
    ) -> Result<(), RepositoryError> {
        if !self.executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound);
        }
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowExecutionInfo>, RepositoryError> {
        Ok(self.executions.get(id).map(|r| r.value().clone()))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowExecutionInfo>, RepositoryError> {
        let mut executions: Vec<WorkflowExecutionInfo> = self
            .executions
            .iter()
            .filter(|r| workflow_id.is_none_or(|id| r.value().workflow_id == *id))
            .map(|r| r.value().clone())
            .collect();
        // UUIDv7 ids are time-ordered, so this is creation order.
        executions.sort_by_key(|e| e.id);
        Ok(executions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
