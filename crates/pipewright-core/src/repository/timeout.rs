//! Timeout instance repository trait definition.

use chrono::{DateTime, Utc};
use pipewright_types::error::RepositoryError;
use pipewright_types::timeout::TimeoutInstance;
use uuid::Uuid;

/// Durable armed deadlines, keyed by node execution.
pub trait TimeoutRepository: Send + Sync {
    fn create_timeout(
        &self,
        timeout: &TimeoutInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_timeout_if_version(
        &self,
        timeout: &TimeoutInstance,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete one instance. Returns `true` only for the caller that removed
    /// it, which makes deletion the claim step of a sweep.
    fn delete_timeout(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every instance armed for a node. Returns how many were removed.
    fn delete_timeouts_for_node(
        &self,
        node_execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    fn list_timeouts_for_node(
        &self,
        node_execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TimeoutInstance>, RepositoryError>> + Send;

    /// Instances whose deadline is at or before `now`, earliest first.
    fn list_due_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<TimeoutInstance>, RepositoryError>> + Send;
}
