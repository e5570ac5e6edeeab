//! Shared domain types for Pipewright.
//!
//! This crate contains the vocabulary of the execution core: the Ambiance
//! addressing chain, the node Status model, compiled Plans, NodeExecution
//! records, Interrupts, resource constraints, delegate tasks, adviser
//! decisions, timeout records, orchestration events and engine config.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod advise;
pub mod ambiance;
pub mod config;
pub mod constraint;
pub mod error;
pub mod event;
pub mod execution;
pub mod interrupt;
pub mod plan;
pub mod status;
pub mod task;
pub mod timeout;
