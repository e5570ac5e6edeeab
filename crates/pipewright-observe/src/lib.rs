//! Observability setup shared by Pipewright binaries.

pub mod tracing_setup;
