use thiserror::Error;

/// Errors from repository operations (used by trait definitions in pipewright-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The stored record moved on since it was read.
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
}

/// Structural problems in a compiled plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("root node '{0}' not found in plan")]
    MissingRoot(String),

    #[error("node references undeclared barrier '{0}'")]
    UnknownBarrier(String),

    #[error("invalid node: {0}")]
    InvalidNode(String),
}
