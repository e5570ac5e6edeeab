//! Plan execution repository trait definition.

use pipewright_types::error::RepositoryError;
use pipewright_types::plan::PlanExecution;
use uuid::Uuid;

pub trait PlanExecutionRepository: Send + Sync {
    fn create_plan_execution(
        &self,
        execution: &PlanExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_plan_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<PlanExecution>, RepositoryError>> + Send;

    fn update_plan_execution_if_version(
        &self,
        execution: &PlanExecution,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Plan executions that have not finished (crash recovery).
    fn list_running_plan_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PlanExecution>, RepositoryError>> + Send;
}
