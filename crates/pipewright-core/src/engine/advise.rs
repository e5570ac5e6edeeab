//! Applying adviser decisions, concluding nodes and retries.

use std::time::Duration;

use chrono::Utc;
use pipewright_types::advise::AdviseAction;
use pipewright_types::ambiance::Level;
use pipewright_types::error::RepositoryError;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::{FailureInfo, NodeExecution};
use pipewright_types::interrupt::{InterruptType, IssuedBy};
use pipewright_types::status::Status;
use pipewright_types::timeout::TimeoutPurpose;
use uuid::Uuid;

use super::command::EngineCommand;
use super::{EngineError, OrchestrationEngine};
use crate::advise::{AdviseError, AdvisingEngine, AdvisingEvent};
use crate::repository::ExecutionStore;
use crate::state::TransitionSource;

impl<S: ExecutionStore> OrchestrationEngine<S> {
    pub(super) async fn advise_command(&self, id: Uuid, from: Status) -> Result<(), EngineError> {
        let record = self.node_execution(id).await?;
        if record.concluded_at.is_some() || record.old_retry {
            return Ok(());
        }
        self.advise(from, &record).await
    }

    /// Run the node's adviser chain on the status it just reached and apply
    /// the answer. Without an answer a final node simply concludes.
    pub(super) async fn advise(&self, from: Status, record: &NodeExecution) -> Result<(), EngineError> {
        let node = self.plan_node(record)?;
        let answer = {
            let event = AdvisingEvent {
                ambiance: &record.ambiance,
                node: &node,
                node_execution: record,
                from,
                to: record.status,
                failure: record.failure.as_ref(),
                retry_count: record.retry_index,
                exhausted_retry: false,
            };
            AdvisingEngine::new(&self.inner.advisers).advise(&event)
        };
        let action = match answer {
            Ok(action) => action,
            Err(e) => return self.adviser_failed(record, &e).await,
        };

        let Some(action) = action else {
            if record.status.is_final() {
                self.conclude(record.id).await?;
            }
            return Ok(());
        };

        tracing::info!(
            node_execution_id = %record.id,
            node_id = %record.node_id,
            status = %record.status,
            action = %action,
            "advise applied"
        );
        self.inner.bus.publish(OrchestrationEvent::AdviseApplied {
            node_execution_id: record.id,
            node_id: record.node_id.clone(),
            action: action.clone(),
        });

        match &action {
            AdviseAction::Proceed { next_node_ids } => {
                self.record_decision(record.id, &action).await?;
                self.proceed(record, next_node_ids).await?;
                self.conclude(record.id).await
            }
            AdviseAction::Retry { wait_ms, .. } => {
                self.record_decision(record.id, &action).await?;
                self.submit_after(
                    Duration::from_millis(*wait_ms),
                    EngineCommand::Retry {
                        node_execution_id: record.id,
                    },
                );
                Ok(())
            }
            AdviseAction::Ignore => {
                self.record_decision(record.id, &action).await?;
                self.conclude(record.id).await
            }
            AdviseAction::Abort => {
                self.record_decision(record.id, &action).await?;
                self.register_interrupt(
                    InterruptType::Abort,
                    record.plan_execution_id,
                    None,
                    IssuedBy::Adviser,
                )
                .await?;
                self.conclude(record.id).await
            }
            AdviseAction::InterventionWait { timeout_secs } => {
                let outcome = self
                    .inner
                    .machine
                    .transition(
                        record.id,
                        Status::InterventionWaiting,
                        TransitionSource::Adviser,
                        |n| n.adviser_decision = Some(action.clone()),
                    )
                    .await?;
                let Some((from, waiting)) = outcome.applied() else {
                    return self.conclude(record.id).await;
                };
                self.settle(from, &waiting).await?;
                let secs = match *timeout_secs {
                    0 => self.inner.config.default_intervention_timeout_secs,
                    secs => secs,
                };
                self.inner
                    .timeouts
                    .arm(
                        record.id,
                        record.plan_execution_id,
                        TimeoutPurpose::Intervention,
                        Duration::from_secs(secs),
                    )
                    .await?;
                tracing::warn!(
                    node_execution_id = %record.id,
                    node_id = %record.node_id,
                    timeout_secs = secs,
                    "node waiting for intervention"
                );
                Ok(())
            }
            AdviseAction::MarkSuccess => {
                let outcome = self
                    .inner
                    .machine
                    .transition(record.id, Status::Succeeded, TransitionSource::Adviser, |n| {
                        n.adviser_decision = Some(action.clone());
                    })
                    .await?;
                if let Some((from, succeeded)) = outcome.applied() {
                    self.settle(from, &succeeded).await?;
                }
                self.conclude(record.id).await
            }
        }
    }

    /// A broken adviser configuration is fatal for the plan execution. The
    /// node keeps its status, carries the configuration failure and the plan
    /// is aborted.
    async fn adviser_failed(&self, record: &NodeExecution, error: &AdviseError) -> Result<(), EngineError> {
        tracing::error!(
            node_execution_id = %record.id,
            node_id = %record.node_id,
            error = %error,
            "adviser failed, aborting plan execution"
        );
        let failure = FailureInfo::configuration(error.to_string());
        self.inner
            .machine
            .update(record.id, |n| {
                n.failure = Some(failure.clone());
                true
            })
            .await?;
        self.register_interrupt(
            InterruptType::Abort,
            record.plan_execution_id,
            None,
            IssuedBy::Adviser,
        )
        .await?;
        if record.parent_id.is_none() {
            // A finished root is not aborted by the cascade.
            self.finish_plan(record.plan_execution_id, Status::Aborted).await?;
        }
        self.conclude(record.id).await
    }

    async fn record_decision(&self, id: Uuid, action: &AdviseAction) -> Result<(), EngineError> {
        self.inner
            .machine
            .update(id, |n| {
                n.adviser_decision = Some(action.clone());
                true
            })
            .await?;
        Ok(())
    }

    /// Start the named siblings under the node's parent.
    async fn proceed(&self, record: &NodeExecution, next_node_ids: &[String]) -> Result<(), EngineError> {
        if next_node_ids.is_empty() {
            return Ok(());
        }
        let Some(parent_id) = record.parent_id else {
            tracing::warn!(node_execution_id = %record.id, "root node has no siblings to proceed to");
            return Ok(());
        };
        let parent = self.node_execution(parent_id).await?;
        let run = self.plan_run(record.plan_execution_id)?;
        if run.is_finished() || parent.status.is_final() {
            tracing::debug!(
                node_execution_id = %record.id,
                parent_status = %parent.status,
                "proceed dropped, enclosing execution already finished"
            );
            return Ok(());
        }
        for next_id in next_node_ids {
            let Some(next) = run.plan.node(next_id) else {
                tracing::warn!(node_id = %next_id, "proceed names an unknown node");
                continue;
            };
            if let Err(e) = self.start_child(&parent, next).await {
                tracing::warn!(node_id = %next_id, error = %e, "next node failed to start");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    /// Replace a failed node with a fresh attempt carrying the next retry
    /// index. The old record stays for history and is excluded from joins.
    pub(super) async fn retry_node(&self, id: Uuid) -> Result<Option<NodeExecution>, EngineError> {
        let old = self.node_execution(id).await?;
        if old.old_retry || old.concluded_at.is_some() {
            return Ok(None);
        }

        let run = self.plan_run(old.plan_execution_id)?;
        let parent_final = match old.parent_id {
            Some(parent_id) => self.node_execution(parent_id).await?.status.is_final(),
            None => false,
        };
        if run.is_finished() || parent_final {
            tracing::debug!(node_execution_id = %id, "retry dropped, enclosing execution already finished");
            self.conclude(id).await?;
            return Ok(None);
        }

        let node = self.plan_node(&old)?;
        let fresh_id = Uuid::now_v7();
        let level = Level {
            node_id: node.id.clone(),
            node_execution_id: fresh_id,
            step_type: node.step_type.clone(),
            retry_index: old.retry_index + 1,
            start_ts: Utc::now(),
        };
        let mut fresh = NodeExecution::queued(old.ambiance.for_retry(level), node.id.clone(), old.parent_id);
        fresh.retry_ids = old.retry_ids.iter().copied().chain([old.id]).collect();
        self.inner.store.create_node_execution(&fresh).await?;

        self.inner
            .machine
            .update(id, |n| {
                n.old_retry = true;
                true
            })
            .await?;
        match old.parent_id {
            Some(parent_id) => {
                self.inner
                    .machine
                    .update(parent_id, |p| {
                        for child in p.child_ids.iter_mut().filter(|c| **c == id) {
                            *child = fresh_id;
                        }
                        true
                    })
                    .await?;
            }
            None => self.replace_root(old.plan_execution_id, fresh_id).await?,
        }

        tracing::info!(
            node_execution_id = %fresh_id,
            replaces = %id,
            node_id = %node.id,
            retry_index = fresh.retry_index,
            "node retried"
        );
        self.prepare(fresh, &node).await.map(Some)
    }

    async fn replace_root(&self, plan_execution_id: Uuid, root_id: Uuid) -> Result<(), EngineError> {
        loop {
            let mut execution = self.plan_execution(plan_execution_id).await?;
            let expected = execution.version;
            execution.root_node_execution_id = Some(root_id);
            execution.version = expected + 1;
            match self
                .inner
                .store
                .update_plan_execution_if_version(&execution, expected)
                .await
            {
                Ok(()) => return Ok(()),
                Err(RepositoryError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
