//! SQLite implementation of `InterruptRepository`.

use pipewright_core::repository::InterruptRepository;
use pipewright_types::error::RepositoryError;
use pipewright_types::interrupt::{Interrupt, InterruptState};
use uuid::Uuid;

use super::store::{
    SqliteStore, decode_all, decode_one, encode, format_datetime, insert_result, query_error,
    to_db_int,
};

impl InterruptRepository for SqliteStore {
    async fn create_interrupt(&self, interrupt: &Interrupt) -> Result<(), RepositoryError> {
        let id = interrupt.id.to_string();
        let result = sqlx::query(
            r#"INSERT INTO interrupts
               (id, plan_execution_id, interrupt_type, state, created_at, version, record)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(interrupt.plan_execution_id.to_string())
        .bind(interrupt.interrupt_type.as_str())
        .bind(interrupt.state.as_str())
        .bind(format_datetime(&interrupt.created_at))
        .bind(to_db_int(interrupt.version))
        .bind(encode(interrupt)?)
        .execute(&self.pool.writer)
        .await;

        insert_result(result, "interrupt", &id)
    }

    async fn get_interrupt(&self, id: &Uuid) -> Result<Option<Interrupt>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM interrupts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_one(row)?.map(|r| r.into_record()).transpose()
    }

    async fn update_interrupt_if_version(
        &self,
        interrupt: &Interrupt,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = interrupt.id.to_string();
        let result = sqlx::query(
            "UPDATE interrupts SET state = ?, version = ?, record = ? WHERE id = ? AND version = ?",
        )
        .bind(interrupt.state.as_str())
        .bind(to_db_int(interrupt.version))
        .bind(encode(interrupt)?)
        .bind(&id)
        .bind(to_db_int(expected_version))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss("interrupts", &id, expected_version).await);
        }
        Ok(())
    }

    async fn list_interrupts(&self, plan_execution_id: &Uuid) -> Result<Vec<Interrupt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM interrupts WHERE plan_execution_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(plan_execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn list_pending_interrupts(&self) -> Result<Vec<Interrupt>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM interrupts WHERE state = ? ORDER BY created_at ASC, id ASC")
            .bind(InterruptState::Registered.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_all(&rows)
    }
}
