//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions and execution
//! records. The engine calls it to create and update records, never to
//! decide business logic; external readers take point-in-time snapshots
//! through the same interface.

use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{WorkflowExecutionInfo, WorkflowInfo, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers two entity families:
/// - **Definitions:** CRUD for `WorkflowInfo`.
/// - **Executions:** create/update/query for `WorkflowExecutionInfo`
///   snapshots (one record per run, owned by the scheduler while the run
///   is live).
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_workflow(
        &self,
        workflow: &WorkflowInfo,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInfo>, RepositoryError>> + Send;

    /// List workflow definitions, optionally filtered by status.
    fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInfo>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    fn delete_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecutionInfo,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace an execution record with a newer snapshot.
    fn update_execution(
        &self,
        execution: &WorkflowExecutionInfo,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution record by its UUID.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecutionInfo>, RepositoryError>> + Send;

    /// List execution records, optionally filtered by workflow.
    fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecutionInfo>, RepositoryError>> + Send;
}
