//! Compare-and-swap transition applier.
//!
//! Every status change, whichever source proposes it, funnels through
//! [`StateMachine::transition`]: read the record, validate the edge against
//! the transition table, write it back conditioned on the version that was
//! read. A lost race re-reads and re-validates, so of two competing events
//! only the first durably recorded one is applied; the other is rejected.

use chrono::Utc;
use pipewright_types::error::RepositoryError;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::NodeExecution;
use pipewright_types::status::Status;
use uuid::Uuid;

use super::transition::{TransitionSource, is_legal};
use crate::event::EventBus;
use crate::repository::NodeExecutionRepository;

/// Upper bound on re-reads when concurrent writers keep winning.
const MAX_CAS_ATTEMPTS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("node execution {0} not found")]
    NotFound(Uuid),

    #[error("node execution {id} still contended after {attempts} attempts")]
    Contention { id: Uuid, attempts: usize },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result of proposing a status change.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The record moved from `from` to the proposed status.
    Applied { from: Status, node: NodeExecution },
    /// The edge is illegal from the record's current status.
    Rejected { current: Status },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn applied(self) -> Option<(Status, NodeExecution)> {
        match self {
            TransitionOutcome::Applied { from, node } => Some((from, node)),
            TransitionOutcome::Rejected { .. } => None,
        }
    }
}

pub struct StateMachine<S> {
    store: S,
    bus: EventBus,
}

impl<S: NodeExecutionRepository> StateMachine<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Propose `to` for a node. `update` sees the record as read, before the
    /// new status is stamped, and runs again on every CAS retry.
    pub async fn transition<F>(
        &self,
        id: Uuid,
        to: Status,
        source: TransitionSource,
        update: F,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        F: Fn(&mut NodeExecution) + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get_node_execution(&id)
                .await?
                .ok_or(TransitionError::NotFound(id))?;
            let from = current.status;

            if !is_legal(from, to, source) {
                tracing::debug!(
                    node_execution_id = %id,
                    from = %from,
                    to = %to,
                    source = %source,
                    "status transition rejected"
                );
                self.bus.publish(OrchestrationEvent::TransitionRejected {
                    node_execution_id: id,
                    from,
                    to,
                    source: source.to_string(),
                });
                return Ok(TransitionOutcome::Rejected { current: from });
            }

            let now = Utc::now();
            let mut next = current.clone();
            update(&mut next);
            next.status = to;
            next.last_updated_at = now;
            if to == Status::Running && next.started_at.is_none() {
                next.started_at = Some(now);
            }
            if to.is_terminal() {
                next.ended_at = Some(now);
            }
            next.version = current.version + 1;

            match self
                .store
                .update_node_execution_if_version(&next, current.version)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        node_execution_id = %id,
                        node_id = %next.node_id,
                        from = %from,
                        to = %to,
                        source = %source,
                        "status transition applied"
                    );
                    self.bus.publish(OrchestrationEvent::StatusChanged {
                        plan_execution_id: next.plan_execution_id,
                        node_execution_id: id,
                        node_id: next.node_id.clone(),
                        from,
                        to,
                    });
                    return Ok(TransitionOutcome::Applied { from, node: next });
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    tracing::trace!(node_execution_id = %id, "version conflict, re-reading");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransitionError::Contention {
            id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Non-status update under the same CAS discipline. `mutate` returns
    /// `false` to leave the record untouched; the result is then `None`.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Result<Option<NodeExecution>, TransitionError>
    where
        F: Fn(&mut NodeExecution) -> bool + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get_node_execution(&id)
                .await?
                .ok_or(TransitionError::NotFound(id))?;

            let mut next = current.clone();
            if !mutate(&mut next) {
                return Ok(None);
            }
            next.last_updated_at = Utc::now();
            next.version = current.version + 1;

            match self
                .store
                .update_node_execution_if_version(&next, current.version)
                .await
            {
                Ok(()) => return Ok(Some(next)),
                Err(RepositoryError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransitionError::Contention {
            id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}
