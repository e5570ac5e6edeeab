//! Crash recovery and forced plan failure.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use pipewright_types::advise::AdviseAction;
use pipewright_types::execution::{
    ExecutionMode, FailureInfo, FailureKind, NodeExecution, children_correlation_id,
};
use pipewright_types::interrupt::{InterruptState, InterruptType};
use pipewright_types::plan::PlanExecution;
use pipewright_types::status::Status;
use uuid::Uuid;

use super::command::EngineCommand;
use super::{EngineError, OrchestrationEngine, PlanRun, has_remote_task};
use crate::interrupt::order_top_down;
use crate::repository::ExecutionStore;
use crate::state::TransitionSource;

impl<S: ExecutionStore> OrchestrationEngine<S> {
    /// Resume every plan execution a previous process left RUNNING.
    ///
    /// Waiters are rebuilt from the persisted handles, inline steps that
    /// were mid-flight are marked ERRORED, QUEUED nodes are driven again and
    /// interrupts that were recorded but never applied are replayed. Timers
    /// live in the store and need no rebuilding.
    pub(super) async fn recover(&self) -> Result<(), EngineError> {
        let executions = self.inner.store.list_running_plan_executions().await?;
        let mut recovered = 0usize;
        for execution in executions {
            if self.inner.plans.contains_key(&execution.id) {
                continue;
            }
            let plan_execution_id = execution.id;
            if let Err(e) = self.recover_execution(execution).await {
                tracing::error!(plan_execution_id = %plan_execution_id, error = %e, "recovery failed");
                continue;
            }
            recovered += 1;
        }

        let pending = self.inner.interrupts.pending().await?;
        for interrupt in &pending {
            self.submit(EngineCommand::ApplyInterrupt {
                interrupt_id: interrupt.id,
            });
        }

        if recovered > 0 || !pending.is_empty() {
            tracing::info!(
                plan_executions = recovered,
                interrupts = pending.len(),
                "recovered in-flight work"
            );
        }
        Ok(())
    }

    async fn recover_execution(&self, execution: PlanExecution) -> Result<(), EngineError> {
        let run = Arc::new(PlanRun::new(Arc::new(execution.plan.clone())));

        // The pause flag is not persisted; the latest applied plan-wide
        // pause or resume decides it.
        let interrupts = self.inner.interrupts.list(execution.id).await?;
        let paused = interrupts
            .iter()
            .filter(|i| i.is_plan_wide() && i.state == InterruptState::Applied)
            .filter(|i| matches!(i.interrupt_type, InterruptType::Pause | InterruptType::Resume))
            .max_by_key(|i| i.applied_at)
            .is_some_and(|i| i.interrupt_type == InterruptType::Pause);
        run.paused.store(paused, Ordering::SeqCst);
        self.inner.plans.insert(execution.id, run);

        let nodes = self
            .inner
            .store
            .list_node_executions(&execution.id, false)
            .await?;
        tracing::info!(
            plan_execution_id = %execution.id,
            nodes = nodes.len(),
            paused,
            "recovering plan execution"
        );
        for node in nodes {
            let id = node.id;
            if let Err(e) = self.recover_node(node).await {
                tracing::warn!(node_execution_id = %id, error = %e, "node recovery failed");
            }
        }
        Ok(())
    }

    async fn recover_node(&self, node: NodeExecution) -> Result<(), EngineError> {
        if node.concluded_at.is_some() {
            return Ok(());
        }

        if node.status.is_final() {
            let command = match node.adviser_decision {
                Some(AdviseAction::Retry { .. }) => EngineCommand::Retry {
                    node_execution_id: node.id,
                },
                _ => EngineCommand::Advise {
                    node_execution_id: node.id,
                    from: node.status,
                },
            };
            self.submit(command);
            return Ok(());
        }

        let joins_children = matches!(node.mode, Some(ExecutionMode::Child | ExecutionMode::Children));
        match node.status {
            Status::Queued => {
                self.submit(EngineCommand::Drive {
                    node_execution_id: node.id,
                });
            }
            Status::Running if joins_children && node.handle.is_some() => {
                self.rewait(&node)?;
                self.check_join(node.id).await?;
            }
            Status::Running => {
                let failure = FailureInfo::new(
                    FailureKind::Unknown,
                    "engine restarted while the step was running",
                );
                let outcome = self
                    .inner
                    .machine
                    .transition(node.id, Status::Errored, TransitionSource::Engine, |n| {
                        n.failure = Some(failure.clone());
                    })
                    .await?;
                if let Some((from, errored)) = outcome.applied() {
                    self.after_transition(from, &errored, TransitionSource::Engine)
                        .await?;
                }
            }
            Status::AsyncWaiting | Status::TaskWaiting if node.has_complete_response() => {
                tracing::info!(node_execution_id = %node.id, "replaying received responses");
                self.submit(EngineCommand::Resume {
                    node_execution_id: node.id,
                    responses: node.parked_responses.clone(),
                });
            }
            Status::AsyncWaiting | Status::TaskWaiting => self.rewait(&node)?,
            Status::Paused => {
                if !node.has_complete_response() {
                    self.rewait(&node)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Register the node's persisted correlations that have not answered
    /// yet with the wait engine again.
    fn rewait(&self, node: &NodeExecution) -> Result<(), EngineError> {
        let correlation_ids = node.outstanding_correlations();
        if correlation_ids.is_empty() {
            return Ok(());
        }
        self.inner
            .dispatcher
            .wait_engine()
            .wait_for_all(node.id, &correlation_ids)?;
        tracing::debug!(
            node_execution_id = %node.id,
            correlations = correlation_ids.len(),
            children = correlation_ids.contains(&children_correlation_id(node.id)),
            "waiter restored"
        );
        Ok(())
    }

    /// Force a plan execution to finish: running and waiting nodes become
    /// ERRORED, everything else not yet final is ABORTED. Nothing is
    /// advised. Returns the number of nodes transitioned.
    pub async fn fail_plan_execution(&self, plan_execution_id: Uuid) -> Result<usize, EngineError> {
        let execution = self.plan_execution(plan_execution_id).await?;
        if execution.is_finished() {
            return Ok(0);
        }
        if !self.inner.plans.contains_key(&plan_execution_id) {
            self.inner.plans.insert(
                plan_execution_id,
                Arc::new(PlanRun::new(Arc::new(execution.plan.clone()))),
            );
        }

        let mut nodes = self
            .inner
            .store
            .list_node_executions(&plan_execution_id, false)
            .await?;
        order_top_down(&mut nodes);

        let mut transitioned = 0usize;
        for node in nodes {
            if node.status.is_final() {
                self.conclude(node.id).await?;
                continue;
            }
            self.inner.dispatcher.abort(node.id, has_remote_task(&node));
            let to = if node.status == Status::Running || node.status.is_response_waiting() {
                Status::Errored
            } else {
                Status::Aborted
            };
            let failure = (to == Status::Errored)
                .then(|| FailureInfo::new(FailureKind::Unknown, "plan execution failed"));
            let outcome = self
                .inner
                .machine
                .transition(node.id, to, TransitionSource::Engine, |n| {
                    if let Some(failure) = &failure {
                        n.failure = Some(failure.clone());
                    }
                })
                .await?;
            if let Some((from, settled)) = outcome.applied() {
                self.settle(from, &settled).await?;
                self.conclude(settled.id).await?;
                transitioned += 1;
            }
        }

        tracing::warn!(
            plan_execution_id = %plan_execution_id,
            nodes = transitioned,
            "plan execution failed"
        );
        Ok(transitioned)
    }
}
