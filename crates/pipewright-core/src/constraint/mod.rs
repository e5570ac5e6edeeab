//! Admission control for named, capacity-limited resources.
//!
//! Restraints admit consumers incrementally while the sum of active permits
//! stays within capacity; barriers hold every party back until all of them
//! have arrived and then admit them together. The per-key ledger update is
//! the one strictly serialized section of the engine.

mod engine;

pub use engine::{Acquisition, ConstraintEngine};

use pipewright_types::error::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("invalid request on '{key}': {message}")]
    InvalidRequest { key: String, message: String },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}
