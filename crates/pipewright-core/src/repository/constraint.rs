//! Resource constraint repository trait definition.

use pipewright_types::constraint::{Consumer, ConsumerState, ResourceConstraint};
use pipewright_types::error::RepositoryError;

/// Storage for resource constraints and their consumer queues.
pub trait ConstraintRepository: Send + Sync {
    /// Insert or replace a constraint by key.
    fn save_constraint(
        &self,
        constraint: &ResourceConstraint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_constraint(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<ResourceConstraint>, RepositoryError>> + Send;

    fn list_constraints(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ResourceConstraint>, RepositoryError>> + Send;

    fn create_consumer(
        &self,
        consumer: &Consumer,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_consumer_if_version(
        &self,
        consumer: &Consumer,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Consumers of a resource in any of `states`, ordered by sequence.
    fn list_consumers(
        &self,
        resource_key: &str,
        states: &[ConsumerState],
    ) -> impl std::future::Future<Output = Result<Vec<Consumer>, RepositoryError>> + Send;

    /// The unfinished consumer registered under `consumer_id`, if any.
    fn find_open_consumer(
        &self,
        resource_key: &str,
        consumer_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Consumer>, RepositoryError>> + Send;
}
