//! SQLite implementation of `PlanExecutionRepository`.

use pipewright_core::repository::PlanExecutionRepository;
use pipewright_types::error::RepositoryError;
use pipewright_types::plan::PlanExecution;
use pipewright_types::status::Status;
use uuid::Uuid;

use super::store::{
    SqliteStore, decode_all, decode_one, encode, format_datetime, insert_result, query_error,
    to_db_int,
};

impl PlanExecutionRepository for SqliteStore {
    async fn create_plan_execution(&self, execution: &PlanExecution) -> Result<(), RepositoryError> {
        let id = execution.id.to_string();
        let result = sqlx::query(
            r#"INSERT INTO plan_executions (id, status, created_at, version, record)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(execution.status.as_str())
        .bind(format_datetime(&execution.created_at))
        .bind(to_db_int(execution.version))
        .bind(encode(execution)?)
        .execute(&self.pool.writer)
        .await;

        insert_result(result, "plan execution", &id)
    }

    async fn get_plan_execution(&self, id: &Uuid) -> Result<Option<PlanExecution>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM plan_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_one(row)?.map(|r| r.into_record()).transpose()
    }

    async fn update_plan_execution_if_version(
        &self,
        execution: &PlanExecution,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = execution.id.to_string();
        let result = sqlx::query(
            r#"UPDATE plan_executions SET status = ?, version = ?, record = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(to_db_int(execution.version))
        .bind(encode(execution)?)
        .bind(&id)
        .bind(to_db_int(expected_version))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss("plan_executions", &id, expected_version).await);
        }
        Ok(())
    }

    async fn list_running_plan_executions(&self) -> Result<Vec<PlanExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM plan_executions WHERE status = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(Status::Running.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows)
    }
}
