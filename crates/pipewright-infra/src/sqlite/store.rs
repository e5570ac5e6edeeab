//! `SqliteStore`: the durable execution store.
//!
//! One value implements every repository port from `pipewright-core`, so it
//! satisfies `ExecutionStore` and can be handed straight to the engine
//! builder. Records are persisted whole as JSON next to the handful of
//! columns the queries filter and order by.

use chrono::{DateTime, SecondsFormat, Utc};
use pipewright_types::error::RepositoryError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};

use super::pool::DatabasePool;

/// SQLite-backed implementation of all execution repositories.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = DatabasePool::new(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "failed to open execution store");
            RepositoryError::Connection
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// After a guarded UPDATE touched no rows, work out whether the record
    /// is missing or was bumped by someone else.
    pub(crate) async fn version_miss(
        &self,
        table: &'static str,
        id: &str,
        expected: u64,
    ) -> RepositoryError {
        let sql = format!("SELECT version FROM {table} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool.writer)
            .await;
        match row {
            Ok(None) => RepositoryError::NotFound,
            Ok(Some(row)) => match row.try_get::<i64, _>("version") {
                Ok(actual) => RepositoryError::VersionConflict {
                    expected,
                    actual: actual as u64,
                },
                Err(e) => query_error(e),
            },
            Err(e) => query_error(e),
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

/// Every table keeps the full record in a `record` column.
pub(crate) struct RecordRow {
    record: String,
}

impl RecordRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            record: row.try_get("record")?,
        })
    }

    pub(crate) fn into_record<T: DeserializeOwned>(self) -> Result<T, RepositoryError> {
        serde_json::from_str(&self.record)
            .map_err(|e| RepositoryError::Query(format!("invalid stored record: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize record: {e}")))
}

pub(crate) fn decode_one(row: Option<SqliteRow>) -> Result<Option<RecordRow>, RepositoryError> {
    row.map(|r| RecordRow::from_row(&r).map_err(query_error)).transpose()
}

pub(crate) fn decode_all<T: DeserializeOwned>(rows: &[SqliteRow]) -> Result<Vec<T>, RepositoryError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let r = RecordRow::from_row(row).map_err(query_error)?;
        records.push(r.into_record()?);
    }
    Ok(records)
}

/// Map the result of an INSERT, turning a key collision into `Conflict`.
pub(crate) fn insert_result(
    result: Result<SqliteQueryResult, sqlx::Error>,
    what: &str,
    id: &str,
) -> Result<(), RepositoryError> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
            Err(RepositoryError::Conflict(format!("{what} '{id}' already exists")))
        }
        Err(e) => Err(query_error(e)),
    }
}

/// Fixed-width UTC timestamps, so string comparison in SQL is time order.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite integers are signed; versions and sequences never get near the top bit.
pub(crate) fn to_db_int(value: u64) -> i64 {
    value as i64
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_datetime_sorts_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        assert!(format_datetime(&early) < format_datetime(&late));
        assert_eq!(format_datetime(&early), "2026-01-02T03:04:05.000000Z");
    }

    #[tokio::test]
    async fn test_connect_to_unwritable_location_is_connection_error() {
        let err = SqliteStore::connect("sqlite:///nonexistent-dir/sub/pw.db")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Connection));
    }
}
