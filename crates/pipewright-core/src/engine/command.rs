//! Command loop and timeout sweeper.

use std::time::Duration;

use chrono::Utc;
use pipewright_types::constraint::ResourceConstraint;
use pipewright_types::interrupt::{InterruptType, IssuedBy};
use pipewright_types::status::Status;
use pipewright_types::task::ResponseBundle;
use pipewright_types::timeout::{TimeoutInstance, TimeoutPurpose};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{EngineError, OrchestrationEngine};
use crate::dispatch::NotifyOutcome;
use crate::interrupt::InterruptError;
use crate::repository::ExecutionStore;

/// Unit of work handled on its own task.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Try to start a QUEUED node.
    Drive { node_execution_id: Uuid },
    /// A node's wait completed with these responses.
    Resume {
        node_execution_id: Uuid,
        responses: ResponseBundle,
    },
    /// Consult the advisers about a status the node reached.
    Advise { node_execution_id: Uuid, from: Status },
    /// Replace a failed node with a fresh attempt.
    Retry { node_execution_id: Uuid },
    /// Apply an interrupt recorded before a restart.
    ApplyInterrupt { interrupt_id: Uuid },
    Expire { timeout: TimeoutInstance },
}

impl EngineCommand {
    fn name(&self) -> &'static str {
        match self {
            EngineCommand::Drive { .. } => "drive",
            EngineCommand::Resume { .. } => "resume",
            EngineCommand::Advise { .. } => "advise",
            EngineCommand::Retry { .. } => "retry",
            EngineCommand::ApplyInterrupt { .. } => "apply_interrupt",
            EngineCommand::Expire { .. } => "expire",
        }
    }
}

impl<S: ExecutionStore> OrchestrationEngine<S> {
    /// Register the configured resources, start the command loop and the
    /// timeout sweeper, then pick up executions left running by a previous
    /// process. May be called once.
    pub async fn start(&self) -> Result<(), EngineError> {
        let receiver = match self.inner.receiver.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }
        .ok_or(EngineError::AlreadyStarted)?;

        for resource in &self.inner.config.resource_constraints {
            if self.inner.constraints.get(&resource.key).await?.is_none() {
                self.inner
                    .constraints
                    .register(ResourceConstraint::restraint(resource.key.clone(), resource.capacity))
                    .await?;
            }
        }

        tokio::spawn(self.clone().run_commands(receiver));
        tokio::spawn(self.clone().run_sweeper());
        tracing::info!(
            steps = self.inner.steps.list_names().len(),
            sweep_interval_ms = self.inner.config.timeout_sweep_interval_ms,
            "orchestration engine started"
        );

        self.recover().await
    }

    /// Stop the command loop and the sweeper. In-flight handlers finish;
    /// queued commands are dropped and picked up again by recovery.
    pub fn shutdown(&self) {
        tracing::info!("orchestration engine shutting down");
        self.inner.cancel.cancel();
    }

    async fn run_commands(self, mut receiver: mpsc::UnboundedReceiver<EngineCommand>) {
        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                command = receiver.recv() => {
                    let Some(command) = command else { break };
                    tokio::spawn(self.clone().handle(command));
                }
            }
        }
        tracing::debug!("command loop stopped");
    }

    async fn run_sweeper(self) {
        let period = Duration::from_millis(self.inner.config.timeout_sweep_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.inner.timeouts.sweep(Utc::now()).await {
                        Ok(fired) => {
                            for timeout in fired {
                                self.submit(EngineCommand::Expire { timeout });
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "timeout sweep failed"),
                    }
                }
            }
        }
        tracing::debug!("timeout sweeper stopped");
    }

    async fn handle(self, command: EngineCommand) {
        let name = command.name();
        let result = match command {
            EngineCommand::Drive { node_execution_id } => self.drive(node_execution_id).await,
            EngineCommand::Resume {
                node_execution_id,
                responses,
            } => self.resume(node_execution_id, responses).await,
            EngineCommand::Advise {
                node_execution_id,
                from,
            } => self.advise_command(node_execution_id, from).await,
            EngineCommand::Retry { node_execution_id } => {
                self.retry_node(node_execution_id).await.map(|_| ())
            }
            EngineCommand::ApplyInterrupt { interrupt_id } => {
                match self.inner.interrupts.get(interrupt_id).await {
                    Ok(interrupt) if interrupt.is_pending() => {
                        self.apply_recorded(interrupt).await.map(|_| ())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            EngineCommand::Expire { timeout } => self.expire(timeout).await,
        };

        match result {
            Ok(()) => {}
            Err(EngineError::Interrupt(InterruptError::Rejected { reason, .. })) => {
                tracing::warn!(command = name, reason = %reason, "interrupt rejected");
            }
            Err(e) => tracing::error!(command = name, error = %e, "engine command failed"),
        }
    }

    async fn expire(&self, timeout: TimeoutInstance) -> Result<(), EngineError> {
        let Some(node) = self
            .inner
            .store
            .get_node_execution(&timeout.node_execution_id)
            .await?
        else {
            return Ok(());
        };

        match timeout.purpose {
            TimeoutPurpose::Response => {
                let waiting = node.status.is_response_waiting()
                    || (node.status == Status::Paused
                        && node.paused_from.is_some_and(|s| s.is_response_waiting()));
                let Some(handle) = node.handle.as_ref().filter(|_| waiting) else {
                    return Ok(());
                };
                tracing::info!(node_execution_id = %node.id, node_id = %node.node_id, "response deadline passed");
                for correlation_id in handle.correlation_ids(node.id) {
                    if let NotifyOutcome::Completed {
                        node_execution_id,
                        responses,
                    } = self.inner.dispatcher.expire(&correlation_id)
                    {
                        self.submit(EngineCommand::Resume {
                            node_execution_id,
                            responses,
                        });
                    }
                }
                Ok(())
            }
            TimeoutPurpose::Intervention => {
                if node.status != Status::InterventionWaiting {
                    return Ok(());
                }
                tracing::warn!(
                    node_execution_id = %node.id,
                    node_id = %node.node_id,
                    "intervention wait timed out, aborting"
                );
                self.register_interrupt(
                    InterruptType::Abort,
                    node.plan_execution_id,
                    Some(node.id),
                    IssuedBy::Timeout,
                )
                .await
                .map(|_| ())
            }
        }
    }
}
