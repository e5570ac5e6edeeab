//! Interrupt repository trait definition.

use pipewright_types::error::RepositoryError;
use pipewright_types::interrupt::Interrupt;
use uuid::Uuid;

/// Append-only store of interrupts. Records are never deleted; the only
/// update is stamping the outcome of applying one.
pub trait InterruptRepository: Send + Sync {
    fn create_interrupt(
        &self,
        interrupt: &Interrupt,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_interrupt(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Interrupt>, RepositoryError>> + Send;

    fn update_interrupt_if_version(
        &self,
        interrupt: &Interrupt,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Interrupts of a plan execution, oldest first.
    fn list_interrupts(
        &self,
        plan_execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Interrupt>, RepositoryError>> + Send;

    /// Registered but not yet applied or rejected (crash recovery).
    fn list_pending_interrupts(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Interrupt>, RepositoryError>> + Send;
}
