//! SQLite implementation of `TimeoutRepository`.

use chrono::{DateTime, Utc};
use pipewright_core::repository::TimeoutRepository;
use pipewright_types::error::RepositoryError;
use pipewright_types::timeout::TimeoutInstance;
use uuid::Uuid;

use super::store::{
    SqliteStore, decode_all, encode, format_datetime, insert_result, query_error, to_db_int,
};

impl TimeoutRepository for SqliteStore {
    async fn create_timeout(&self, timeout: &TimeoutInstance) -> Result<(), RepositoryError> {
        let id = timeout.id.to_string();
        let result = sqlx::query(
            r#"INSERT INTO timeout_instances
               (id, node_execution_id, plan_execution_id, deadline, version, record)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(timeout.node_execution_id.to_string())
        .bind(timeout.plan_execution_id.to_string())
        .bind(format_datetime(&timeout.deadline))
        .bind(to_db_int(timeout.version))
        .bind(encode(timeout)?)
        .execute(&self.pool.writer)
        .await;

        insert_result(result, "timeout", &id)
    }

    async fn update_timeout_if_version(
        &self,
        timeout: &TimeoutInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = timeout.id.to_string();
        let result = sqlx::query(
            r#"UPDATE timeout_instances SET deadline = ?, version = ?, record = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(format_datetime(&timeout.deadline))
        .bind(to_db_int(timeout.version))
        .bind(encode(timeout)?)
        .bind(&id)
        .bind(to_db_int(expected_version))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss("timeout_instances", &id, expected_version).await);
        }
        Ok(())
    }

    async fn delete_timeout(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM timeout_instances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_timeouts_for_node(&self, node_execution_id: &Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM timeout_instances WHERE node_execution_id = ?")
            .bind(node_execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn list_timeouts_for_node(
        &self,
        node_execution_id: &Uuid,
    ) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM timeout_instances WHERE node_execution_id = ? ORDER BY deadline ASC, id ASC",
        )
        .bind(node_execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn list_due_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM timeout_instances WHERE deadline <= ? ORDER BY deadline ASC, id ASC",
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        // The column is truncated to microseconds; settle ties on the full value.
        let mut due: Vec<TimeoutInstance> = decode_all(&rows)?;
        due.retain(|t| t.is_due(now));
        Ok(due)
    }
}
