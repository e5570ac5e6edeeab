//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (pipewright-infra) implements. Every mutable record carries a `version`;
//! `update_*_if_version` is the compare-and-swap primitive the engine builds
//! its per-entity optimistic concurrency on. The caller bumps the record's
//! `version` to `expected_version + 1` before calling.

pub mod constraint;
pub mod interrupt;
pub mod memory;
pub mod node_execution;
pub mod plan_execution;
pub mod timeout;

pub use constraint::ConstraintRepository;
pub use interrupt::InterruptRepository;
pub use memory::MemoryStore;
pub use node_execution::NodeExecutionRepository;
pub use plan_execution::PlanExecutionRepository;
pub use timeout::TimeoutRepository;

/// Everything the orchestration engine persists.
///
/// Blanket-implemented for any cloneable type implementing all the
/// repository ports, so `MemoryStore` and `SqliteStore` qualify as-is.
pub trait ExecutionStore:
    NodeExecutionRepository
    + InterruptRepository
    + ConstraintRepository
    + TimeoutRepository
    + PlanExecutionRepository
    + Clone
    + 'static
{
}

impl<T> ExecutionStore for T where
    T: NodeExecutionRepository
        + InterruptRepository
        + ConstraintRepository
        + TimeoutRepository
        + PlanExecutionRepository
        + Clone
        + 'static
{
}
