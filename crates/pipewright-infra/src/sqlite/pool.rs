//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time, and the execution store relies on
//! that: every compare-and-swap runs on the single writer connection, so a
//! version check and the write it guards can never interleave with another
//! writer. Reads go through a separate multi-connection pool.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized INSERT/UPDATE/DELETE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url` and bring
    /// its schema up to date.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // The reader pool is read-only and cannot create the schema itself.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(database_url, "opened execution store");

        Ok(Self { reader, writer })
    }
}

/// Returns the default database URL inside `data_dir`.
pub fn database_url_in(data_dir: &Path) -> String {
    format!("sqlite://{}/pipewright.db?mode=rwc", data_dir.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url_in(dir.path());

        let pool = DatabasePool::new(&url).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "interrupts",
            "node_executions",
            "plan_executions",
            "resource_constraints",
            "resource_consumers",
            "timeout_instances",
        ] {
            assert!(table_names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn test_pool_wal_mode_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url_in(dir.path())).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let (fk,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(fk, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url_in(dir.path());
        let first = DatabasePool::new(&url).await.unwrap();
        first.writer.close().await;
        first.reader.close().await;
        assert!(DatabasePool::new(&url).await.is_ok());
    }

    #[test]
    fn test_database_url_in() {
        let url = database_url_in(Path::new("/var/lib/pw"));
        assert_eq!(url, "sqlite:///var/lib/pw/pipewright.db?mode=rwc");
    }
}
