//! SQLite storage layer.
//!
//! `SqliteStore` implements every repository port of the execution core on
//! top of a WAL-mode database with split read/write connection pools.

pub mod constraint;
#[cfg(test)]
mod engine_tests;
pub mod interrupt;
pub mod node_execution;
pub mod plan_execution;
pub mod pool;
pub mod store;
pub mod timeout;

pub use pool::DatabasePool;
pub use store::SqliteStore;
