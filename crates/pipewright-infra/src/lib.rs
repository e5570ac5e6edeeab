//! Infrastructure layer for Pipewright.
//!
//! Implements the ports defined in `pipewright-core`: the SQLite execution
//! store, the HTTP transport to remote workers, and configuration loading
//! from the data directory.

pub mod config;
pub mod delegate;
pub mod sqlite;
