//! Execution core and repository trait definitions for Pipewright.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the orchestration engine that drives node
//! executions through their lifecycle. It depends only on `pipewright-types`
//! -- never on `pipewright-infra` or any database/IO crate.

pub mod advise;
pub mod constraint;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod facilitation;
pub mod interrupt;
pub mod repository;
pub mod state;
pub mod step;
pub mod timeout;
