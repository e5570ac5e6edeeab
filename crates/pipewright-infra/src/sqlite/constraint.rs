//! SQLite implementation of `ConstraintRepository`.
//!
//! Consumers are never deleted; a FINISHED row is history. The queue order is
//! the `sequence` column, assigned by the caller when the consumer enqueues.

use pipewright_core::repository::ConstraintRepository;
use pipewright_types::constraint::{ConstraintKind, Consumer, ConsumerState, ResourceConstraint};
use pipewright_types::error::RepositoryError;
use sqlx::{QueryBuilder, Sqlite};

use super::store::{
    SqliteStore, decode_all, decode_one, encode, insert_result, query_error, to_db_int,
};

impl ConstraintRepository for SqliteStore {
    async fn save_constraint(&self, constraint: &ResourceConstraint) -> Result<(), RepositoryError> {
        let kind = match constraint.kind {
            ConstraintKind::Restraint => "restraint",
            ConstraintKind::Barrier => "barrier",
        };

        sqlx::query(
            r#"INSERT INTO resource_constraints (key, kind, capacity, record)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 kind = excluded.kind,
                 capacity = excluded.capacity,
                 record = excluded.record"#,
        )
        .bind(&constraint.key)
        .bind(kind)
        .bind(i64::from(constraint.capacity))
        .bind(encode(constraint)?)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_constraint(&self, key: &str) -> Result<Option<ResourceConstraint>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM resource_constraints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_one(row)?.map(|r| r.into_record()).transpose()
    }

    async fn list_constraints(&self) -> Result<Vec<ResourceConstraint>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM resource_constraints ORDER BY key ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn create_consumer(&self, consumer: &Consumer) -> Result<(), RepositoryError> {
        let id = consumer.id.to_string();
        let result = sqlx::query(
            r#"INSERT INTO resource_consumers
               (id, resource_key, consumer_id, state, sequence, version, record)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&consumer.resource_key)
        .bind(&consumer.consumer_id)
        .bind(consumer.state.as_str())
        .bind(to_db_int(consumer.sequence))
        .bind(to_db_int(consumer.version))
        .bind(encode(consumer)?)
        .execute(&self.pool.writer)
        .await;

        insert_result(result, "consumer", &id)
    }

    async fn update_consumer_if_version(
        &self,
        consumer: &Consumer,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = consumer.id.to_string();
        let result = sqlx::query(
            r#"UPDATE resource_consumers SET state = ?, version = ?, record = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(consumer.state.as_str())
        .bind(to_db_int(consumer.version))
        .bind(encode(consumer)?)
        .bind(&id)
        .bind(to_db_int(expected_version))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss("resource_consumers", &id, expected_version).await);
        }
        Ok(())
    }

    async fn list_consumers(
        &self,
        resource_key: &str,
        states: &[ConsumerState],
    ) -> Result<Vec<Consumer>, RepositoryError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT record FROM resource_consumers WHERE resource_key = ");
        builder.push_bind(resource_key);
        builder.push(" AND state IN (");
        let mut separated = builder.separated(", ");
        for state in states {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(") ORDER BY sequence ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn find_open_consumer(
        &self,
        resource_key: &str,
        consumer_id: &str,
    ) -> Result<Option<Consumer>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT record FROM resource_consumers
               WHERE resource_key = ? AND consumer_id = ? AND state != ?
               ORDER BY sequence ASC LIMIT 1"#,
        )
        .bind(resource_key)
        .bind(consumer_id)
        .bind(ConsumerState::Finished.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_one(row)?.map(|r| r.into_record()).transpose()
    }
}
