//! SQLite implementation of `NodeExecutionRepository`.
//!
//! `old_retry` is mirrored into its own column so the "current records only"
//! queries stay index lookups.

use pipewright_core::repository::NodeExecutionRepository;
use pipewright_types::error::RepositoryError;
use pipewright_types::execution::NodeExecution;
use pipewright_types::status::Status;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::store::{
    SqliteStore, decode_all, decode_one, encode, format_datetime, insert_result, query_error,
    to_db_int,
};

impl NodeExecutionRepository for SqliteStore {
    async fn create_node_execution(&self, node: &NodeExecution) -> Result<(), RepositoryError> {
        let id = node.id.to_string();
        let result = sqlx::query(
            r#"INSERT INTO node_executions
               (id, plan_execution_id, parent_id, node_id, status, old_retry, created_at, version, record)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(node.plan_execution_id.to_string())
        .bind(node.parent_id.map(|p| p.to_string()))
        .bind(&node.node_id)
        .bind(node.status.as_str())
        .bind(node.old_retry)
        .bind(format_datetime(&node.created_at))
        .bind(to_db_int(node.version))
        .bind(encode(node)?)
        .execute(&self.pool.writer)
        .await;

        insert_result(result, "node execution", &id)
    }

    async fn get_node_execution(&self, id: &Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_one(row)?.map(|r| r.into_record()).transpose()
    }

    async fn update_node_execution_if_version(
        &self,
        node: &NodeExecution,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = node.id.to_string();
        let result = sqlx::query(
            r#"UPDATE node_executions
               SET status = ?, old_retry = ?, version = ?, record = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(node.status.as_str())
        .bind(node.old_retry)
        .bind(to_db_int(node.version))
        .bind(encode(node)?)
        .bind(&id)
        .bind(to_db_int(expected_version))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss("node_executions", &id, expected_version).await);
        }
        Ok(())
    }

    async fn list_node_executions(
        &self,
        plan_execution_id: &Uuid,
        include_retries: bool,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let sql = if include_retries {
            "SELECT record FROM node_executions WHERE plan_execution_id = ? ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT record FROM node_executions WHERE plan_execution_id = ? AND old_retry = 0 ORDER BY created_at ASC, id ASC"
        };
        let rows = sqlx::query(sql)
            .bind(plan_execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn list_children(&self, parent_id: &Uuid) -> Result<Vec<NodeExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM node_executions WHERE parent_id = ? AND old_retry = 0 ORDER BY created_at ASC, id ASC",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows)
    }

    async fn list_node_executions_with_status(
        &self,
        statuses: &[Status],
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT record FROM node_executions WHERE old_retry = 0 AND status IN (");
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(") ORDER BY created_at ASC, id ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        decode_all(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::test_support::{make_node, seeded_plan_execution, test_store};
    use pipewright_types::execution::{FailureInfo, FailureKind};

    #[tokio::test]
    async fn test_create_get_and_conflict() {
        let (store, _dir) = test_store().await;
        let pe = seeded_plan_execution(&store).await;
        let mut node = make_node(&pe, "build", None);
        node.failure = Some(FailureInfo::new(FailureKind::Application, "boom"));
        store.create_node_execution(&node).await.unwrap();

        let loaded = store.get_node_execution(&node.id).await.unwrap().unwrap();
        assert_eq!(loaded.node_id, "build");
        assert_eq!(loaded.ambiance, node.ambiance);
        assert_eq!(loaded.failure.unwrap().message, "boom");

        let err = store.create_node_execution(&node).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_node_requires_existing_plan_execution() {
        let (store, _dir) = test_store().await;
        let orphan = make_node(&crate::sqlite::store::test_support::make_plan_execution(), "x", None);
        assert!(store.create_node_execution(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let (store, _dir) = test_store().await;
        let pe = seeded_plan_execution(&store).await;
        let node = make_node(&pe, "a", None);
        store.create_node_execution(&node).await.unwrap();

        let mut first = node.clone();
        first.status = Status::Running;
        first.version = 1;
        store.update_node_execution_if_version(&first, 0).await.unwrap();

        // A writer that read version 0 loses.
        let mut stale = node.clone();
        stale.status = Status::Skipped;
        stale.version = 1;
        let err = store
            .update_node_execution_if_version(&stale, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::VersionConflict { expected: 0, actual: 1 }
        ));
        let stored = store.get_node_execution(&node.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Running);

        let missing = make_node(&pe, "ghost", None);
        let err = store
            .update_node_execution_if_version(&missing, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_retried_records_hidden_unless_requested() {
        let (store, _dir) = test_store().await;
        let pe = seeded_plan_execution(&store).await;
        let root = make_node(&pe, "root", None);
        store.create_node_execution(&root).await.unwrap();

        let mut first_try = make_node(&pe, "b", Some(root.id));
        store.create_node_execution(&first_try).await.unwrap();
        let second_try = make_node(&pe, "b", Some(root.id));
        store.create_node_execution(&second_try).await.unwrap();

        first_try.old_retry = true;
        first_try.status = Status::Failed;
        first_try.version = 1;
        store.update_node_execution_if_version(&first_try, 0).await.unwrap();

        let current = store.list_node_executions(&pe.id, false).await.unwrap();
        assert_eq!(current.iter().map(|n| n.id).collect::<Vec<_>>(), vec![root.id, second_try.id]);

        let all = store.list_node_executions(&pe.id, true).await.unwrap();
        assert_eq!(all.len(), 3);

        let children = store.list_children(&root.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, second_try.id);

        let failed = store
            .list_node_executions_with_status(&[Status::Failed])
            .await
            .unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_list_with_status_spans_plan_executions() {
        let (store, _dir) = test_store().await;
        let first = seeded_plan_execution(&store).await;
        let second = seeded_plan_execution(&store).await;

        let mut waiting = make_node(&first, "gate", None);
        waiting.status = Status::AsyncWaiting;
        let mut task = make_node(&second, "build", None);
        task.status = Status::TaskWaiting;
        let queued = make_node(&second, "later", None);
        for node in [&waiting, &task, &queued] {
            store.create_node_execution(node).await.unwrap();
        }

        let found = store
            .list_node_executions_with_status(&[Status::AsyncWaiting, Status::TaskWaiting])
            .await
            .unwrap();
        assert_eq!(found.iter().map(|n| n.id).collect::<Vec<_>>(), vec![waiting.id, task.id]);
        assert!(store.list_node_executions_with_status(&[]).await.unwrap().is_empty());
    }
}
