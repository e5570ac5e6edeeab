//! Advising: deciding the next control action after a status event.
//!
//! Advisers are resolved from the node's adviser obtainments through
//! [`AdviserRegistry`] and consulted in declaration order; the first one
//! that answers decides. The engine imposes no default policy: when no
//! adviser answers, nothing happens beyond the transition itself.

pub mod builtin;
pub mod registry;

use pipewright_types::advise::AdviseAction;
use pipewright_types::ambiance::Ambiance;
use pipewright_types::execution::{FailureInfo, NodeExecution};
use pipewright_types::plan::PlanNode;
use pipewright_types::status::Status;

pub use registry::AdviserRegistry;

#[derive(Debug, thiserror::Error)]
pub enum AdviseError {
    #[error("unknown adviser type '{0}'")]
    UnknownAdviser(String),

    #[error("invalid parameters for adviser '{adviser}': {message}")]
    InvalidParameters { adviser: String, message: String },
}

/// Everything an adviser sees about the transition it is asked about.
#[derive(Debug, Clone, Copy)]
pub struct AdvisingEvent<'a> {
    pub ambiance: &'a Ambiance,
    pub node: &'a PlanNode,
    pub node_execution: &'a NodeExecution,
    pub from: Status,
    pub to: Status,
    pub failure: Option<&'a FailureInfo>,
    /// Retries already made for this plan node.
    pub retry_count: u32,
    /// Set when a previous answer asked for a retry past its own limit.
    pub exhausted_retry: bool,
}

impl AdvisingEvent<'_> {
    /// Whether the event reports a failure an adviser may act on.
    pub fn is_failure(&self) -> bool {
        self.to.is_failure()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.to, Status::Succeeded | Status::Skipped)
    }
}

/// A single advising policy.
///
/// `Ok(None)` means "no opinion": the next obtained adviser is consulted.
pub trait Adviser: Send + Sync {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError>;

    /// Check an obtainment's parameters before the node is scheduled.
    fn validate(&self, _parameters: &serde_json::Value) -> Result<(), AdviseError> {
        Ok(())
    }
}

/// Runs a node's adviser chain against an event.
pub struct AdvisingEngine<'a> {
    registry: &'a AdviserRegistry,
}

impl<'a> AdvisingEngine<'a> {
    pub fn new(registry: &'a AdviserRegistry) -> Self {
        Self { registry }
    }

    /// Every obtainment must name a registered adviser with parameters it
    /// accepts.
    pub fn validate(&self, node: &PlanNode) -> Result<(), AdviseError> {
        for obtainment in &node.adviser_obtainments {
            let adviser = self
                .registry
                .get(&obtainment.adviser_type)
                .ok_or_else(|| AdviseError::UnknownAdviser(obtainment.adviser_type.clone()))?;
            adviser.validate(&obtainment.parameters)?;
        }
        Ok(())
    }

    /// First answer in obtainment order, or `None`.
    ///
    /// A retry answer beyond its own `max_attempts` is not applied: the chain
    /// is re-run with `exhausted_retry` set so a later adviser can choose a
    /// terminal action. If the chain insists on retrying, the answer is
    /// dropped.
    pub fn advise(&self, event: &AdvisingEvent<'_>) -> Result<Option<AdviseAction>, AdviseError> {
        let action = self.run_chain(event)?;
        match action {
            Some(AdviseAction::Retry { max_attempts, .. }) if event.retry_count >= max_attempts => {
                tracing::debug!(
                    node_id = %event.node.id,
                    retry_count = event.retry_count,
                    max_attempts,
                    "retry exhausted, re-advising"
                );
                let exhausted = AdvisingEvent {
                    exhausted_retry: true,
                    ..*event
                };
                match self.run_chain(&exhausted)? {
                    Some(AdviseAction::Retry { .. }) => Ok(None),
                    other => Ok(other),
                }
            }
            other => Ok(other),
        }
    }

    fn run_chain(&self, event: &AdvisingEvent<'_>) -> Result<Option<AdviseAction>, AdviseError> {
        for obtainment in &event.node.adviser_obtainments {
            let adviser = self
                .registry
                .get(&obtainment.adviser_type)
                .ok_or_else(|| AdviseError::UnknownAdviser(obtainment.adviser_type.clone()))?;
            if let Some(action) = adviser.advise(event, &obtainment.parameters)? {
                return Ok(Some(action));
            }
        }
        Ok(None)
    }
}
