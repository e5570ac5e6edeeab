//! The orchestration engine.
//!
//! `OrchestrationEngine` owns every subsystem of the execution core and
//! drives node executions through their lifecycle. Work is funnelled
//! through a command channel: starting a node, resuming it after a
//! response, advising it, retrying it and applying interrupts are all
//! commands handled on their own tasks, so no handler ever waits on another.
//! Every status change goes through the [`StateMachine`], which is what
//! keeps concurrent handlers for the same node consistent.

mod advise;
pub mod builder;
mod command;
mod drive;
mod interrupt;
mod recovery;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use pipewright_types::ambiance::{Ambiance, Level};
use pipewright_types::config::EngineConfig;
use pipewright_types::constraint::{ResourceConstraint, ResourceSnapshot};
use pipewright_types::error::{PlanError, RepositoryError};
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::{ExecutableHandle, NodeExecution};
use pipewright_types::interrupt::Interrupt;
use pipewright_types::plan::{Plan, PlanExecution, PlanNode};
use pipewright_types::status::Status;
use pipewright_types::task::{ResponseBundle, ResponseData};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::advise::{AdviseError, AdviserRegistry};
use crate::constraint::{ConstraintEngine, ConstraintError};
use crate::dispatch::{DispatchError, NotifyOutcome, TaskDispatcher};
use crate::event::EventBus;
use crate::facilitation::{FacilitationError, FacilitatorRegistry};
use crate::interrupt::{InterruptError, InterruptLedger};
use crate::repository::ExecutionStore;
use crate::state::{StateMachine, TransitionError, TransitionOutcome, TransitionSource};
use crate::step::{StepError, StepRegistry};
use crate::timeout::TimeoutTracker;

pub use builder::EngineBuilder;
use command::EngineCommand;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Facilitation(#[from] FacilitationError),

    #[error(transparent)]
    Advise(#[from] AdviseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Interrupt(#[from] InterruptError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("plan execution {0} not found")]
    PlanExecutionNotFound(Uuid),

    #[error("node execution {0} not found")]
    NodeExecutionNotFound(Uuid),

    #[error("plan has no node '{0}'")]
    UnknownPlanNode(String),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine is shut down")]
    ShutDown,
}

/// Identifiers handed back when a plan is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanHandle {
    pub plan_execution_id: Uuid,
    pub root_node_execution_id: Uuid,
}

/// In-memory companion of a running plan execution.
struct PlanRun {
    plan: Arc<Plan>,
    /// Set by a plan-wide pause; QUEUED nodes are held while it is set.
    paused: AtomicBool,
    /// Carries the final status once the root concludes.
    finished: watch::Sender<Option<Status>>,
}

impl PlanRun {
    fn new(plan: Arc<Plan>) -> Self {
        let (finished, _) = watch::channel(None);
        Self {
            plan,
            paused: AtomicBool::new(false),
            finished,
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_finished(&self) -> bool {
        self.finished.borrow().is_some()
    }
}

struct EngineInner<S> {
    store: S,
    config: EngineConfig,
    bus: EventBus,
    machine: StateMachine<S>,
    steps: StepRegistry,
    facilitators: FacilitatorRegistry,
    advisers: AdviserRegistry,
    dispatcher: TaskDispatcher,
    timeouts: TimeoutTracker<S>,
    constraints: ConstraintEngine<S>,
    interrupts: InterruptLedger<S>,
    plans: DashMap<Uuid, Arc<PlanRun>>,
    commands: mpsc::UnboundedSender<EngineCommand>,
    receiver: std::sync::Mutex<Option<mpsc::UnboundedReceiver<EngineCommand>>>,
    cancel: CancellationToken,
}

/// Handle to the execution core. Cheap to clone; all clones share state.
pub struct OrchestrationEngine<S: ExecutionStore> {
    inner: Arc<EngineInner<S>>,
}

impl<S: ExecutionStore> Clone for OrchestrationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Whether aborting the node should also cancel work on a remote worker.
fn has_remote_task(node: &NodeExecution) -> bool {
    matches!(
        node.handle,
        Some(ExecutableHandle::Task { .. } | ExecutableHandle::TaskChain { .. })
    )
}

/// Consumer key a barrier is registered under for one plan execution.
fn barrier_key(plan_execution_id: Uuid, key: &str) -> String {
    format!("{plan_execution_id}/{key}")
}

impl<S: ExecutionStore> OrchestrationEngine<S> {
    pub fn builder(store: S) -> EngineBuilder<S> {
        EngineBuilder::new(store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.inner.bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Validate `plan`, record a new execution of it and start its root.
    pub async fn start_plan(&self, plan: Plan) -> Result<PlanHandle, EngineError> {
        if self.inner.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        plan.validate()?;

        for declaration in &plan.resources {
            if self.inner.constraints.get(&declaration.key).await?.is_none() {
                self.inner
                    .constraints
                    .register(ResourceConstraint::restraint(
                        declaration.key.clone(),
                        declaration.capacity,
                    ))
                    .await?;
            }
        }

        let mut execution = PlanExecution::new(plan);
        for barrier in &execution.plan.barriers {
            self.inner
                .constraints
                .register(ResourceConstraint::barrier(
                    barrier_key(execution.id, &barrier.key),
                    barrier.parties,
                ))
                .await?;
        }

        let root_id = Uuid::now_v7();
        execution.root_node_execution_id = Some(root_id);
        self.inner.store.create_plan_execution(&execution).await?;

        let plan = Arc::new(execution.plan.clone());
        self.inner
            .plans
            .insert(execution.id, Arc::new(PlanRun::new(Arc::clone(&plan))));

        tracing::info!(
            plan_id = %plan.id,
            plan_execution_id = %execution.id,
            nodes = plan.nodes.len(),
            "plan execution started"
        );
        self.inner.bus.publish(OrchestrationEvent::PlanStarted {
            plan_id: plan.id,
            plan_execution_id: execution.id,
        });

        let root = plan
            .root()
            .ok_or_else(|| PlanError::MissingRoot(plan.root_node_id.clone()))?;
        let ambiance = Ambiance::new(plan.id, execution.id);
        let node = self.create_node_execution(&ambiance, root, None, root_id).await?;
        if let Err(e) = self.prepare(node, root).await {
            tracing::warn!(plan_execution_id = %execution.id, error = %e, "root node failed to start");
        }

        Ok(PlanHandle {
            plan_execution_id: execution.id,
            root_node_execution_id: root_id,
        })
    }

    /// Wait until a plan execution finishes and return its status.
    pub async fn await_plan(&self, plan_execution_id: Uuid) -> Result<Status, EngineError> {
        if let Ok(run) = self.plan_run(plan_execution_id) {
            let mut finished = run.finished.subscribe();
            let status = finished.wait_for(Option::is_some).await.ok().and_then(|s| *s);
            if let Some(status) = status {
                return Ok(status);
            }
        }
        let execution = self.plan_execution(plan_execution_id).await?;
        Ok(execution.status)
    }

    pub async fn plan_execution(&self, id: Uuid) -> Result<PlanExecution, EngineError> {
        self.inner
            .store
            .get_plan_execution(&id)
            .await?
            .ok_or(EngineError::PlanExecutionNotFound(id))
    }

    pub async fn node_execution(&self, id: Uuid) -> Result<NodeExecution, EngineError> {
        self.inner
            .store
            .get_node_execution(&id)
            .await?
            .ok_or(EngineError::NodeExecutionNotFound(id))
    }

    pub async fn list_node_executions(
        &self,
        plan_execution_id: Uuid,
        include_retries: bool,
    ) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self
            .inner
            .store
            .list_node_executions(&plan_execution_id, include_retries)
            .await?)
    }

    pub async fn list_interrupts(&self, plan_execution_id: Uuid) -> Result<Vec<Interrupt>, EngineError> {
        Ok(self.inner.interrupts.list(plan_execution_id).await?)
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub async fn register_resource(&self, constraint: ResourceConstraint) -> Result<(), EngineError> {
        Ok(self.inner.constraints.register(constraint).await?)
    }

    pub async fn resource_snapshot(&self, key: &str) -> Result<ResourceSnapshot, EngineError> {
        Ok(self.inner.constraints.snapshot(key).await?)
    }

    // -----------------------------------------------------------------------
    // External events
    // -----------------------------------------------------------------------

    /// Deliver a callback or delegate response. An accepted response is
    /// stored on its node before it is acknowledged, so a restart replays
    /// it. The response that completes a node's wait schedules the node's
    /// resume; duplicates are discarded.
    pub async fn ingest_response(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> Result<NotifyOutcome, EngineError> {
        let outcome = self.inner.dispatcher.ingest(correlation_id, data.clone());
        let node_execution_id = match &outcome {
            NotifyOutcome::Completed {
                node_execution_id, ..
            }
            | NotifyOutcome::Pending { node_execution_id } => *node_execution_id,
            NotifyOutcome::Discarded => return Ok(outcome),
        };

        let received = ResponseBundle::from([(correlation_id.to_string(), data)]);
        let recorded = self.record_responses(node_execution_id, &received).await;
        if let NotifyOutcome::Completed {
            node_execution_id,
            responses,
        } = &outcome
        {
            self.submit(EngineCommand::Resume {
                node_execution_id: *node_execution_id,
                responses: responses.clone(),
            });
        }
        recorded?;
        Ok(outcome)
    }

    /// A status reported for a node by its step from outside the engine.
    pub async fn on_status_event(
        &self,
        node_execution_id: Uuid,
        status: Status,
    ) -> Result<TransitionOutcome, EngineError> {
        let outcome = self
            .inner
            .machine
            .transition(node_execution_id, status, TransitionSource::Step, |_| {})
            .await?;
        if let TransitionOutcome::Applied { from, node } = &outcome {
            self.after_transition(*from, node, TransitionSource::Step).await?;
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Internals shared by the handlers
    // -----------------------------------------------------------------------

    fn submit(&self, command: EngineCommand) {
        if self.inner.commands.send(command).is_err() {
            tracing::warn!("engine command channel closed, command dropped");
        }
    }

    fn submit_after(&self, delay: Duration, command: EngineCommand) {
        if delay.is_zero() {
            self.submit(command);
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = engine.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => engine.submit(command),
            }
        });
    }

    fn plan_run(&self, plan_execution_id: Uuid) -> Result<Arc<PlanRun>, EngineError> {
        self.inner
            .plans
            .get(&plan_execution_id)
            .map(|run| Arc::clone(run.value()))
            .ok_or(EngineError::PlanExecutionNotFound(plan_execution_id))
    }

    fn plan_node(&self, node: &NodeExecution) -> Result<PlanNode, EngineError> {
        let run = self.plan_run(node.plan_execution_id)?;
        run.plan
            .node(&node.node_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPlanNode(node.node_id.clone()))
    }

    async fn create_node_execution(
        &self,
        parent_ambiance: &Ambiance,
        node: &PlanNode,
        parent_id: Option<Uuid>,
        id: Uuid,
    ) -> Result<NodeExecution, EngineError> {
        let level = Level {
            node_id: node.id.clone(),
            node_execution_id: id,
            step_type: node.step_type.clone(),
            retry_index: 0,
            start_ts: Utc::now(),
        };
        let record = NodeExecution::queued(parent_ambiance.with_level(level), node.id.clone(), parent_id);
        self.inner.store.create_node_execution(&record).await?;
        tracing::debug!(
            node_execution_id = %record.id,
            node_id = %record.node_id,
            path = %record.ambiance.node_path(),
            "node execution created"
        );
        Ok(record)
    }

    async fn attach_children(&self, parent_id: Uuid, child_ids: &[Uuid]) -> Result<(), EngineError> {
        self.inner
            .machine
            .update(parent_id, |parent| {
                parent.child_ids.extend(child_ids.iter().copied());
                true
            })
            .await?;
        Ok(())
    }

    /// Mark a final node as settled and report it upwards: the root finishes
    /// the plan, any other node may complete its parent's join.
    async fn conclude(&self, id: Uuid) -> Result<(), EngineError> {
        let concluded = self
            .inner
            .machine
            .update(id, |node| {
                if node.concluded_at.is_some() || node.old_retry || !node.status.is_final() {
                    return false;
                }
                node.concluded_at = Some(Utc::now());
                true
            })
            .await?;
        let Some(node) = concluded else {
            return Ok(());
        };
        tracing::debug!(node_execution_id = %id, status = %node.status, "node concluded");

        match node.parent_id {
            None => self.finish_plan(node.plan_execution_id, node.status).await,
            Some(parent_id) => self.check_join(parent_id).await,
        }
    }

    async fn finish_plan(&self, plan_execution_id: Uuid, status: Status) -> Result<(), EngineError> {
        loop {
            let mut execution = self.plan_execution(plan_execution_id).await?;
            if execution.is_finished() {
                return Ok(());
            }
            let expected = execution.version;
            execution.status = status;
            execution.ended_at = Some(Utc::now());
            execution.version = expected + 1;
            match self
                .inner
                .store
                .update_plan_execution_if_version(&execution, expected)
                .await
            {
                Ok(()) => break,
                Err(RepositoryError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(plan_execution_id = %plan_execution_id, status = %status, "plan execution finished");
        self.inner.bus.publish(OrchestrationEvent::PlanFinished {
            plan_execution_id,
            status,
        });
        if let Ok(run) = self.plan_run(plan_execution_id) {
            run.finished.send_replace(Some(status));
        }
        Ok(())
    }
}
