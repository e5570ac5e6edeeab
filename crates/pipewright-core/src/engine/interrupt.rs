//! Interrupt application.
//!
//! An interrupt is recorded before it is applied, so one accepted right
//! before a crash is applied again on restart. Application resolves the
//! target set, walks it top-down and proposes one transition per node;
//! nodes that already moved on are left alone, which keeps every
//! interrupt idempotent.

use chrono::Utc;
use pipewright_types::advise::AdviseAction;
use pipewright_types::execution::{ExecutionMode, NodeExecution};
use pipewright_types::interrupt::{Interrupt, InterruptEffect, InterruptType, IssuedBy};
use pipewright_types::status::Status;
use std::sync::atomic::Ordering;
use uuid::Uuid;

use super::command::EngineCommand;
use super::{EngineError, OrchestrationEngine, has_remote_task};
use crate::interrupt::{collect_descendants, order_top_down};
use crate::repository::ExecutionStore;
use crate::state::TransitionSource;

/// Affected node executions, or the reason the interrupt does not apply.
type Application = Result<Vec<Uuid>, String>;

fn effect_of(interrupt: &Interrupt) -> InterruptEffect {
    InterruptEffect {
        interrupt_id: interrupt.id,
        interrupt_type: interrupt.interrupt_type,
        issued_by: interrupt.issued_by.clone(),
        applied_at: Utc::now(),
    }
}

/// QUEUED and waiting nodes pause; a RUNNING node only while it waits on
/// its children.
fn can_pause(node: &NodeExecution) -> bool {
    match node.status {
        Status::Queued | Status::AsyncWaiting | Status::TaskWaiting => true,
        Status::Running => matches!(node.mode, Some(ExecutionMode::Child | ExecutionMode::Children)),
        _ => false,
    }
}

impl<S: ExecutionStore> OrchestrationEngine<S> {
    /// Record an interrupt against a plan execution (or one node of it) and
    /// apply it. A rejected interrupt is stored with its reason and returned
    /// as [`InterruptError::Rejected`](crate::interrupt::InterruptError).
    pub async fn register_interrupt(
        &self,
        interrupt_type: InterruptType,
        plan_execution_id: Uuid,
        node_execution_id: Option<Uuid>,
        issued_by: IssuedBy,
    ) -> Result<Interrupt, EngineError> {
        self.plan_execution(plan_execution_id).await?;
        if let Some(id) = node_execution_id {
            let target = self.node_execution(id).await?;
            if target.plan_execution_id != plan_execution_id {
                return Err(EngineError::NodeExecutionNotFound(id));
            }
        }

        let interrupt = Interrupt::new(interrupt_type, plan_execution_id, node_execution_id, issued_by);
        self.inner.interrupts.record(&interrupt).await?;
        self.apply_recorded(interrupt).await
    }

    pub(super) async fn apply_recorded(&self, interrupt: Interrupt) -> Result<Interrupt, EngineError> {
        let application = match interrupt.interrupt_type {
            InterruptType::Abort => self.apply_abort(&interrupt).await.map(Ok)?,
            InterruptType::Pause => self.apply_pause(&interrupt).await?,
            InterruptType::Resume => self.apply_resume(&interrupt).await?,
            InterruptType::Retry
            | InterruptType::MarkSuccess
            | InterruptType::MarkFailed
            | InterruptType::Ignore => self.apply_resolution(&interrupt).await?,
        };

        match application {
            Ok(affected) => Ok(self.inner.interrupts.mark_applied(&interrupt, affected).await?),
            Err(reason) => Err(self.inner.interrupts.mark_rejected(&interrupt, reason).await?.into()),
        }
    }

    /// The target and its descendants, or every current node of the plan
    /// execution, ordered parents first.
    async fn interrupt_targets(&self, interrupt: &Interrupt) -> Result<Vec<NodeExecution>, EngineError> {
        let mut targets = match interrupt.node_execution_id {
            None => {
                self.inner
                    .store
                    .list_node_executions(&interrupt.plan_execution_id, false)
                    .await?
            }
            Some(root_id) => {
                let root = self.node_execution(root_id).await?;
                let mut targets = vec![root];
                targets.extend(collect_descendants(&self.inner.store, root_id).await?);
                targets
            }
        };
        order_top_down(&mut targets);
        Ok(targets)
    }

    // -----------------------------------------------------------------------
    // Abort
    // -----------------------------------------------------------------------

    async fn apply_abort(&self, interrupt: &Interrupt) -> Result<Vec<Uuid>, EngineError> {
        let effect = effect_of(interrupt);
        let targets = self.interrupt_targets(interrupt).await?;
        let source = TransitionSource::Interrupt(InterruptType::Abort);

        let mut affected = Vec::new();
        for target in targets.into_iter().filter(|n| !n.status.is_terminal()) {
            self.inner.dispatcher.abort(target.id, has_remote_task(&target));
            let outcome = self
                .inner
                .machine
                .transition(target.id, Status::Aborted, source, |n| {
                    n.interrupt_history.push(effect.clone());
                })
                .await?;
            if let Some((from, aborted)) = outcome.applied() {
                self.settle(from, &aborted).await?;
                self.conclude(aborted.id).await?;
                affected.push(aborted.id);
            }
        }

        tracing::info!(
            interrupt_id = %interrupt.id,
            plan_execution_id = %interrupt.plan_execution_id,
            aborted = affected.len(),
            "abort applied"
        );
        Ok(affected)
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    async fn apply_pause(&self, interrupt: &Interrupt) -> Result<Application, EngineError> {
        let run = self.plan_run(interrupt.plan_execution_id)?;
        if run.is_finished() {
            return Ok(Err("plan execution already finished".to_string()));
        }
        let targets = self.interrupt_targets(interrupt).await?;

        if let Some(id) = interrupt.node_execution_id {
            if let Some(target) = targets.iter().find(|n| n.id == id) {
                if !can_pause(target) {
                    return Ok(Err(format!("node is {} and cannot be paused", target.status)));
                }
            }
        } else {
            run.paused.store(true, Ordering::SeqCst);
        }

        let effect = effect_of(interrupt);
        let source = TransitionSource::Interrupt(InterruptType::Pause);
        let mut affected = Vec::new();
        for target in targets.into_iter().filter(can_pause) {
            let outcome = self
                .inner
                .machine
                .transition(target.id, Status::Paused, source, |n| {
                    n.paused_from = Some(n.status);
                    n.interrupt_history.push(effect.clone());
                })
                .await?;
            if let Some((_, paused)) = outcome.applied() {
                affected.push(paused.id);
            }
        }

        tracing::info!(
            interrupt_id = %interrupt.id,
            plan_execution_id = %interrupt.plan_execution_id,
            paused = affected.len(),
            "pause applied"
        );
        Ok(Ok(affected))
    }

    async fn apply_resume(&self, interrupt: &Interrupt) -> Result<Application, EngineError> {
        let run = self.plan_run(interrupt.plan_execution_id)?;
        let targets = self.interrupt_targets(interrupt).await?;

        let was_paused = match interrupt.node_execution_id {
            Some(id) => {
                if let Some(target) = targets.iter().find(|n| n.id == id) {
                    if target.status != Status::Paused {
                        return Ok(Err(format!("node is {}, not paused", target.status)));
                    }
                }
                false
            }
            None => run.paused.swap(false, Ordering::SeqCst),
        };

        let paused: Vec<NodeExecution> = targets
            .into_iter()
            .filter(|n| n.status == Status::Paused)
            .collect();
        if paused.is_empty() && interrupt.is_plan_wide() && !was_paused {
            return Ok(Err("plan execution has nothing paused".to_string()));
        }

        let effect = effect_of(interrupt);
        let source = TransitionSource::Interrupt(InterruptType::Resume);
        let mut affected = Vec::new();
        for target in paused {
            let restore = target.paused_from.unwrap_or(Status::Queued);
            let outcome = self
                .inner
                .machine
                .transition(target.id, restore, source, |n| {
                    n.paused_from = None;
                    n.interrupt_history.push(effect.clone());
                })
                .await?;
            let Some((_, resumed)) = outcome.applied() else {
                continue;
            };
            affected.push(resumed.id);

            // Received responses stay on the record until the step consumes
            // them.
            if resumed.has_complete_response() {
                self.submit(EngineCommand::Resume {
                    node_execution_id: resumed.id,
                    responses: resumed.parked_responses.clone(),
                });
            } else if resumed.status == Status::Queued {
                self.submit(EngineCommand::Drive {
                    node_execution_id: resumed.id,
                });
            }
        }

        tracing::info!(
            interrupt_id = %interrupt.id,
            plan_execution_id = %interrupt.plan_execution_id,
            resumed = affected.len(),
            "resume applied"
        );
        Ok(Ok(affected))
    }

    // -----------------------------------------------------------------------
    // Resolutions: retry, mark success, mark failed, ignore
    // -----------------------------------------------------------------------

    async fn apply_resolution(&self, interrupt: &Interrupt) -> Result<Application, EngineError> {
        let kind = interrupt.interrupt_type;
        let Some(id) = interrupt.node_execution_id else {
            return Ok(Err(format!("{kind} needs a node execution target")));
        };
        let target = self.node_execution(id).await?;

        let (to, allowed) = match kind {
            InterruptType::Retry => (Status::Failed, target.status == Status::InterventionWaiting),
            InterruptType::MarkSuccess => (
                Status::Succeeded,
                target.status == Status::InterventionWaiting || target.status.is_failure(),
            ),
            _ => (
                Status::Failed,
                matches!(target.status, Status::InterventionWaiting | Status::Errored),
            ),
        };
        if !allowed {
            return Ok(Err(format!("node is {}, cannot apply {kind}", target.status)));
        }

        let effect = effect_of(interrupt);
        let decision = (kind == InterruptType::Ignore).then_some(AdviseAction::Ignore);
        let outcome = self
            .inner
            .machine
            .transition(id, to, TransitionSource::Interrupt(kind), |n| {
                n.interrupt_history.push(effect.clone());
                if let Some(decision) = &decision {
                    n.adviser_decision = Some(decision.clone());
                }
            })
            .await?;
        let Some((from, resolved)) = outcome.applied() else {
            return Ok(Err(format!("node moved on before {kind} applied")));
        };

        tracing::info!(
            interrupt_id = %interrupt.id,
            node_execution_id = %id,
            node_id = %resolved.node_id,
            status = %resolved.status,
            "{kind} applied"
        );
        self.settle(from, &resolved).await?;
        if kind == InterruptType::Retry {
            self.retry_node(id).await?;
        } else {
            self.conclude(id).await?;
        }
        Ok(Ok(vec![id]))
    }
}
