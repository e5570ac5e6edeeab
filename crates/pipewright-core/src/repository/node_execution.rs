//! NodeExecution repository trait definition.

use pipewright_types::error::RepositoryError;
use pipewright_types::execution::NodeExecution;
use pipewright_types::status::Status;
use uuid::Uuid;

/// Repository trait for node execution records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait NodeExecutionRepository: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the ID exists.
    fn create_node_execution(
        &self,
        node: &NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_node_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Replace the stored record only if its version is still
    /// `expected_version`. Returns `VersionConflict` otherwise.
    fn update_node_execution_if_version(
        &self,
        node: &NodeExecution,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All records of a plan execution, ordered by creation time. Records
    /// replaced by a retry are skipped unless `include_retries` is set.
    fn list_node_executions(
        &self,
        plan_execution_id: &Uuid,
        include_retries: bool,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    /// Current (non-retried) children of a node, ordered by creation time.
    fn list_children(
        &self,
        parent_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    /// Current records in any of `statuses`, across all plan executions.
    fn list_node_executions_with_status(
        &self,
        statuses: &[Status],
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;
}
