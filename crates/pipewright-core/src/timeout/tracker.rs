use std::time::Duration;

use chrono::{DateTime, Utc};
use pipewright_types::error::RepositoryError;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::timeout::{TimeoutInstance, TimeoutPurpose};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::TimeoutRepository;

pub struct TimeoutTracker<S> {
    store: S,
    bus: EventBus,
}

impl<S: TimeoutRepository> TimeoutTracker<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Arm a deadline `after` from now.
    pub async fn arm(
        &self,
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        purpose: TimeoutPurpose,
        after: Duration,
    ) -> Result<TimeoutInstance, RepositoryError> {
        let after = chrono::Duration::from_std(after).unwrap_or(chrono::Duration::MAX);
        let deadline = Utc::now()
            .checked_add_signed(after)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let instance = TimeoutInstance::new(node_execution_id, plan_execution_id, purpose, deadline);
        self.store.create_timeout(&instance).await?;
        tracing::debug!(
            node_execution_id = %node_execution_id,
            purpose = purpose.as_str(),
            deadline = %deadline,
            "timeout armed"
        );
        Ok(instance)
    }

    /// Remove every timer of a node. Returns how many were removed.
    pub async fn disarm(&self, node_execution_id: Uuid) -> Result<u64, RepositoryError> {
        let removed = self.store.delete_timeouts_for_node(&node_execution_id).await?;
        if removed > 0 {
            tracing::debug!(node_execution_id = %node_execution_id, removed, "timeouts disarmed");
        }
        Ok(removed)
    }

    pub async fn armed(&self, node_execution_id: Uuid) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        self.store.list_timeouts_for_node(&node_execution_id).await
    }

    /// Claim every timer due at `now`. Only instances this call deleted are
    /// returned.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        let due = self.store.list_due_timeouts(now).await?;
        let mut fired = Vec::with_capacity(due.len());
        for instance in due {
            if !self.store.delete_timeout(&instance.id).await? {
                continue;
            }
            tracing::info!(
                node_execution_id = %instance.node_execution_id,
                timeout_id = %instance.id,
                purpose = instance.purpose.as_str(),
                "timeout fired"
            );
            self.bus.publish(OrchestrationEvent::TimeoutFired {
                node_execution_id: instance.node_execution_id,
                timeout_id: instance.id,
            });
            fired.push(instance);
        }
        Ok(fired)
    }
}
