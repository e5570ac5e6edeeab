//! Starting nodes, dispatching their work and resuming them.

use std::time::Duration;

use pipewright_types::constraint::{AcquireOutcome, Consumer};
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::{
    ExecutableHandle, ExecutionMode, FailureInfo, FailureKind, NodeExecution, Outcomes,
    StepResponse, children_correlation_id,
};
use pipewright_types::plan::PlanNode;
use pipewright_types::status::Status;
use pipewright_types::task::{DelegateTask, ResponseBundle, ResponseData, TaskRequest};
use pipewright_types::timeout::TimeoutPurpose;
use uuid::Uuid;

use super::command::EngineCommand;
use super::{EngineError, OrchestrationEngine, barrier_key};
use crate::advise::AdvisingEngine;
use crate::constraint::ConstraintError;
use crate::dispatch::NotifyOutcome;
use crate::facilitation::{FacilitationEngine, FacilitatorResponse};
use crate::repository::ExecutionStore;
use crate::state::TransitionSource;
use crate::step::{ExecutableResponse, StepError, aggregate_responses};

fn step_error_response(error: &StepError) -> StepResponse {
    match error {
        StepError::InvalidParameters(_) | StepError::Unsupported(_) => {
            StepResponse::failed(FailureInfo::configuration(error.to_string()))
        }
        StepError::Failed(message) => {
            StepResponse::errored(FailureInfo::new(FailureKind::Application, message.clone()))
        }
    }
}

fn timeout_failure(responses: &ResponseBundle) -> Option<FailureInfo> {
    responses.values().find_map(|data| match data {
        ResponseData::Failure { failure } if failure.kind == FailureKind::Timeout => {
            Some(failure.clone())
        }
        _ => None,
    })
}

fn outcomes_value(outcomes: &Outcomes) -> serde_json::Value {
    serde_json::Value::Object(outcomes.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

impl<S: ExecutionStore> OrchestrationEngine<S> {
    // -----------------------------------------------------------------------
    // Preparation
    // -----------------------------------------------------------------------

    /// Create an execution of `node` as a child of `parent_id` and prepare it.
    pub(super) async fn start_child(
        &self,
        parent: &NodeExecution,
        node: &PlanNode,
    ) -> Result<NodeExecution, EngineError> {
        let record = self
            .create_node_execution(&parent.ambiance, node, Some(parent.id), Uuid::now_v7())
            .await?;
        self.attach_children(parent.id, &[record.id]).await?;
        self.prepare(record, node).await
    }

    /// Skip, or facilitate and schedule, a freshly QUEUED node. A node that
    /// cannot be facilitated fails with a configuration error and is never
    /// advised.
    pub(super) async fn prepare(
        &self,
        record: NodeExecution,
        node: &PlanNode,
    ) -> Result<NodeExecution, EngineError> {
        let skip = match node.when {
            _ if node.skip => true,
            Some(when) => !when.allows(self.plan_has_failure(record.plan_execution_id).await?),
            None => false,
        };
        if skip {
            let outcome = self
                .inner
                .machine
                .transition(record.id, Status::Skipped, TransitionSource::Engine, |_| {})
                .await?;
            return match outcome.applied() {
                Some((from, skipped)) => {
                    tracing::info!(node_execution_id = %skipped.id, node_id = %skipped.node_id, "node skipped");
                    self.submit(EngineCommand::Advise {
                        node_execution_id: skipped.id,
                        from,
                    });
                    Ok(skipped)
                }
                None => self.node_execution(record.id).await,
            };
        }

        let facilitated = match self.validate_node(node).await {
            Ok(()) => FacilitationEngine::new(&self.inner.facilitators, &self.inner.steps)
                .facilitate(&record.ambiance, node)
                .map_err(EngineError::from),
            Err(e) => Err(e),
        };

        match facilitated {
            Ok(FacilitatorResponse { mode, initial_wait }) => {
                let updated = self
                    .inner
                    .machine
                    .update(record.id, |n| {
                        if n.status != Status::Queued {
                            return false;
                        }
                        n.mode = Some(mode);
                        true
                    })
                    .await?;
                tracing::debug!(
                    node_execution_id = %record.id,
                    node_id = %record.node_id,
                    mode = %mode,
                    initial_wait_ms = initial_wait.as_millis() as u64,
                    "node facilitated"
                );
                self.submit_after(
                    initial_wait,
                    EngineCommand::Drive {
                        node_execution_id: record.id,
                    },
                );
                Ok(updated.unwrap_or(record))
            }
            Err(e) => {
                tracing::warn!(
                    node_execution_id = %record.id,
                    node_id = %record.node_id,
                    error = %e,
                    "node cannot be facilitated"
                );
                let failure = FailureInfo::configuration(e.to_string());
                let outcome = self
                    .inner
                    .machine
                    .transition(record.id, Status::Failed, TransitionSource::Engine, |n| {
                        n.failure = Some(failure.clone());
                    })
                    .await?;
                if outcome.is_applied() {
                    self.conclude(record.id).await?;
                }
                Err(e)
            }
        }
    }

    /// Obtainments and resources must resolve before a node is scheduled.
    async fn validate_node(&self, node: &PlanNode) -> Result<(), EngineError> {
        AdvisingEngine::new(&self.inner.advisers).validate(node)?;
        if let Some(req) = &node.restraint {
            if self.inner.constraints.get(&req.resource_key).await?.is_none() {
                return Err(ConstraintError::UnknownResource(req.resource_key.clone()).into());
            }
        }
        Ok(())
    }

    async fn plan_has_failure(&self, plan_execution_id: Uuid) -> Result<bool, EngineError> {
        let nodes = self
            .inner
            .store
            .list_node_executions(&plan_execution_id, false)
            .await?;
        Ok(nodes.iter().any(NodeExecution::counts_as_failure))
    }

    // -----------------------------------------------------------------------
    // Drive
    // -----------------------------------------------------------------------

    /// Admit a QUEUED node through its barrier and restraint, then run its
    /// step.
    pub(super) async fn drive(&self, id: Uuid) -> Result<(), EngineError> {
        let record = self.node_execution(id).await?;
        if record.status != Status::Queued {
            tracing::trace!(node_execution_id = %id, status = %record.status, "drive skipped");
            return Ok(());
        }

        let run = self.plan_run(record.plan_execution_id)?;
        if run.is_paused() || self.parent_paused(&record).await? {
            let outcome = self
                .inner
                .machine
                .transition(id, Status::Paused, TransitionSource::Engine, |n| {
                    n.paused_from = Some(Status::Queued);
                })
                .await?;
            if outcome.is_applied() {
                tracing::info!(node_execution_id = %id, node_id = %record.node_id, "node held by pause");
            }
            return Ok(());
        }

        if run.is_finished() || self.parent_final(&record).await? {
            return self.abort_orphan(&record).await;
        }

        let node = self.plan_node(&record)?;
        if !self.admit(&record, &node).await? {
            return Ok(());
        }

        let outcome = self
            .inner
            .machine
            .transition(id, Status::Running, TransitionSource::Engine, |_| {})
            .await?;
        let Some((_, running)) = outcome.applied() else {
            self.release_resources(&record).await?;
            return Ok(());
        };

        tracing::info!(
            node_execution_id = %id,
            node_id = %running.node_id,
            step_type = %node.step_type,
            retry_index = running.retry_index,
            "node started"
        );
        self.inner.bus.publish(OrchestrationEvent::NodeStarted {
            plan_execution_id: running.plan_execution_id,
            node_execution_id: id,
            node_id: running.node_id.clone(),
            retry_index: running.retry_index,
        });

        let Some(step) = self.inner.steps.get(node.step_type.as_str()) else {
            let failure = FailureInfo::configuration(format!("unknown step type '{}'", node.step_type));
            return self
                .complete(id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        };

        let inputs = self.sibling_outcomes(&running).await?;
        let response = match step.execute(&running.ambiance, &node, &inputs).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(node_execution_id = %id, error = %e, "step execution failed");
                return self
                    .complete(id, step_error_response(&e), TransitionSource::Step)
                    .await;
            }
        };

        let mode = running.mode.unwrap_or_else(|| step.facilitate_default());
        if !response.fits(mode) {
            let failure = FailureInfo::configuration(format!(
                "step answered {} under {mode} mode",
                response.mode()
            ));
            return self
                .complete(id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        }

        match response {
            ExecutableResponse::Sync(response) => {
                self.complete(id, response, TransitionSource::Step).await
            }
            ExecutableResponse::Async {
                callback_ids,
                timeout_secs,
            } => {
                self.await_callbacks(&running, &node, callback_ids, timeout_secs)
                    .await
            }
            ExecutableResponse::Task(task) if mode == ExecutionMode::TaskChain => {
                self.dispatch_link(&running, &node, task, Some(0)).await
            }
            ExecutableResponse::Task(task) => self.dispatch_link(&running, &node, task, None).await,
            ExecutableResponse::TaskChain(task) => {
                self.dispatch_link(&running, &node, task, Some(0)).await
            }
            ExecutableResponse::Child { node_id } => {
                let handle = ExecutableHandle::Child {
                    node_id: node_id.clone(),
                };
                self.spawn_children(&running, vec![node_id], handle).await
            }
            ExecutableResponse::Children { node_ids } => {
                let handle = ExecutableHandle::Children {
                    node_ids: node_ids.clone(),
                };
                self.spawn_children(&running, node_ids, handle).await
            }
        }
    }

    async fn parent_paused(&self, record: &NodeExecution) -> Result<bool, EngineError> {
        let Some(parent_id) = record.parent_id else {
            return Ok(false);
        };
        Ok(self
            .inner
            .store
            .get_node_execution(&parent_id)
            .await?
            .is_some_and(|p| p.status == Status::Paused))
    }

    async fn parent_final(&self, record: &NodeExecution) -> Result<bool, EngineError> {
        let Some(parent_id) = record.parent_id else {
            return Ok(false);
        };
        Ok(self
            .inner
            .store
            .get_node_execution(&parent_id)
            .await?
            .is_some_and(|p| p.status.is_final()))
    }

    /// A QUEUED node whose parent or plan already finished never starts.
    async fn abort_orphan(&self, record: &NodeExecution) -> Result<(), EngineError> {
        let outcome = self
            .inner
            .machine
            .transition(record.id, Status::Aborted, TransitionSource::Engine, |_| {})
            .await?;
        if let Some((from, aborted)) = outcome.applied() {
            tracing::info!(
                node_execution_id = %aborted.id,
                node_id = %aborted.node_id,
                "node aborted, enclosing execution already finished"
            );
            self.settle(from, &aborted).await?;
            self.conclude(aborted.id).await?;
        }
        Ok(())
    }

    /// Barrier first, then restraint. `false` leaves the node QUEUED until a
    /// grant re-drives it.
    async fn admit(&self, record: &NodeExecution, node: &PlanNode) -> Result<bool, EngineError> {
        let consumer_id = record.id.to_string();

        if let Some(barrier) = &node.barrier {
            let key = barrier_key(record.plan_execution_id, barrier);
            let acquisition = self.inner.constraints.acquire(&key, &consumer_id, 1, 0).await?;
            self.drive_granted(&acquisition.granted);
            if acquisition.outcome == AcquireOutcome::Queued {
                tracing::debug!(node_execution_id = %record.id, barrier = %key, "waiting at barrier");
                return Ok(false);
            }
        }

        if let Some(req) = &node.restraint {
            let acquisition = self
                .inner
                .constraints
                .acquire(&req.resource_key, &consumer_id, req.permits, req.priority)
                .await?;
            if acquisition.outcome == AcquireOutcome::Queued {
                tracing::debug!(
                    node_execution_id = %record.id,
                    resource_key = %req.resource_key,
                    permits = req.permits,
                    "waiting for resource"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn drive_granted(&self, granted: &[Consumer]) {
        for consumer in granted {
            if let Ok(node_execution_id) = Uuid::parse_str(&consumer.consumer_id) {
                self.submit(EngineCommand::Drive { node_execution_id });
            }
        }
    }

    /// Outcomes of the node's succeeded siblings, keyed by plan node ID.
    async fn sibling_outcomes(&self, record: &NodeExecution) -> Result<Outcomes, EngineError> {
        let Some(parent_id) = record.parent_id else {
            return Ok(Outcomes::new());
        };
        let siblings = self.inner.store.list_children(&parent_id).await?;
        Ok(siblings
            .iter()
            .filter(|s| s.id != record.id && s.status == Status::Succeeded)
            .map(|s| (s.node_id.clone(), outcomes_value(&s.outcomes)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Waiting modes
    // -----------------------------------------------------------------------

    async fn await_callbacks(
        &self,
        record: &NodeExecution,
        node: &PlanNode,
        callback_ids: Vec<String>,
        timeout_secs: Option<u64>,
    ) -> Result<(), EngineError> {
        if callback_ids.is_empty() {
            let failure = FailureInfo::configuration("async step named no callback ids");
            return self
                .complete(record.id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        }
        if let Err(e) = self
            .inner
            .dispatcher
            .wait_engine()
            .wait_for_all(record.id, &callback_ids)
        {
            let failure = FailureInfo::configuration(e.to_string());
            return self
                .complete(record.id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        }

        let handle = ExecutableHandle::Async { callback_ids };
        let outcome = self
            .inner
            .machine
            .transition(record.id, Status::AsyncWaiting, TransitionSource::Engine, |n| {
                n.handle = Some(handle.clone());
            })
            .await?;
        if !outcome.is_applied() {
            return Ok(());
        }
        self.arm_response_timeout(record, timeout_secs.or(node.timeout_secs))
            .await
    }

    /// Dispatch one task. `link` is `None` for a plain task node and the
    /// link index for a task chain.
    async fn dispatch_link(
        &self,
        record: &NodeExecution,
        node: &PlanNode,
        request: TaskRequest,
        link: Option<u32>,
    ) -> Result<(), EngineError> {
        let index = link.unwrap_or(0);
        let timeout_secs = request
            .timeout_secs
            .or(node.timeout_secs)
            .unwrap_or(self.inner.config.default_task_timeout_secs);
        let task = DelegateTask {
            correlation_id: format!("{}-{index}", record.id),
            task_type: request.task_type,
            payload: request.payload,
            abstractions: request.abstractions,
            plan_execution_id: record.plan_execution_id,
            node_execution_id: record.id,
            timeout_secs,
        };

        if let Err(e) = self.inner.dispatcher.expect(&task) {
            let failure = FailureInfo::configuration(e.to_string());
            return self
                .complete(record.id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        }

        let handle = match link {
            Some(link_index) => ExecutableHandle::TaskChain {
                correlation_id: task.correlation_id.clone(),
                task_type: task.task_type.clone(),
                link_index,
            },
            None => ExecutableHandle::Task {
                correlation_id: task.correlation_id.clone(),
                task_type: task.task_type.clone(),
            },
        };
        let recorded = if index == 0 {
            self.inner
                .machine
                .transition(record.id, Status::TaskWaiting, TransitionSource::Engine, |n| {
                    n.handle = Some(handle.clone());
                })
                .await?
                .is_applied()
        } else {
            self.inner
                .machine
                .update(record.id, |n| {
                    if n.status != Status::TaskWaiting {
                        return false;
                    }
                    n.handle = Some(handle.clone());
                    true
                })
                .await?
                .is_some()
        };
        if !recorded {
            self.inner.dispatcher.abort(record.id, false);
            return Ok(());
        }

        self.arm_response_timeout(record, Some(timeout_secs)).await?;
        if let Some(NotifyOutcome::Completed {
            node_execution_id,
            responses,
        }) = self.inner.dispatcher.submit(&task).await
        {
            let recorded = self.record_responses(node_execution_id, &responses).await;
            self.submit(EngineCommand::Resume {
                node_execution_id,
                responses,
            });
            recorded?;
        }
        Ok(())
    }

    async fn arm_response_timeout(
        &self,
        record: &NodeExecution,
        timeout_secs: Option<u64>,
    ) -> Result<(), EngineError> {
        let secs = timeout_secs.unwrap_or(self.inner.config.default_task_timeout_secs);
        self.inner
            .timeouts
            .arm(
                record.id,
                record.plan_execution_id,
                TimeoutPurpose::Response,
                Duration::from_secs(secs),
            )
            .await?;
        Ok(())
    }

    /// Create every child record before preparing any, so the join cannot
    /// complete while siblings are still being created.
    async fn spawn_children(
        &self,
        parent: &NodeExecution,
        node_ids: Vec<String>,
        handle: ExecutableHandle,
    ) -> Result<(), EngineError> {
        let run = self.plan_run(parent.plan_execution_id)?;
        let nodes: Result<Vec<PlanNode>, String> = node_ids
            .iter()
            .map(|id| run.plan.node(id).cloned().ok_or_else(|| id.clone()))
            .collect();
        let nodes = match nodes {
            Ok(nodes) => nodes,
            Err(missing) => {
                let failure = FailureInfo::configuration(format!("plan has no child node '{missing}'"));
                return self
                    .complete(parent.id, StepResponse::failed(failure), TransitionSource::Engine)
                    .await;
            }
        };
        if nodes.is_empty() {
            return self
                .complete(parent.id, StepResponse::succeeded(Outcomes::new()), TransitionSource::Step)
                .await;
        }

        let correlation_id = children_correlation_id(parent.id);
        if let Err(e) = self
            .inner
            .dispatcher
            .wait_engine()
            .wait_for_all(parent.id, std::slice::from_ref(&correlation_id))
        {
            let failure = FailureInfo::configuration(e.to_string());
            return self
                .complete(parent.id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        }
        let recorded = self
            .inner
            .machine
            .update(parent.id, |n| {
                if n.status != Status::Running {
                    return false;
                }
                n.handle = Some(handle.clone());
                true
            })
            .await?;
        if recorded.is_none() {
            self.inner.dispatcher.wait_engine().cancel_node(parent.id);
            return Ok(());
        }

        let mut children = Vec::with_capacity(nodes.len());
        for node in &nodes {
            children.push(
                self.create_node_execution(&parent.ambiance, node, Some(parent.id), Uuid::now_v7())
                    .await?,
            );
        }
        let child_ids: Vec<Uuid> = children.iter().map(|c| c.id).collect();
        self.attach_children(parent.id, &child_ids).await?;
        tracing::debug!(
            node_execution_id = %parent.id,
            children = child_ids.len(),
            "children scheduled"
        );

        for (child, node) in children.into_iter().zip(&nodes) {
            if let Err(e) = self.prepare(child, node).await {
                tracing::warn!(node_id = %node.id, error = %e, "child failed to start");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Hand a completed wait back to the node's step. A paused node parks
    /// the bundle until it is resumed.
    pub(super) async fn resume(&self, id: Uuid, responses: ResponseBundle) -> Result<(), EngineError> {
        let record = self.node_execution(id).await?;

        if record.status == Status::Paused {
            let parked = self
                .inner
                .machine
                .update(id, |n| {
                    if n.status != Status::Paused {
                        return false;
                    }
                    n.parked_responses.extend(responses.clone());
                    true
                })
                .await?;
            match parked {
                Some(_) => tracing::info!(node_execution_id = %id, "response parked while paused"),
                None => self.submit(EngineCommand::Resume {
                    node_execution_id: id,
                    responses,
                }),
            }
            return Ok(());
        }

        if record.status != Status::Running && !record.status.is_response_waiting() {
            tracing::debug!(node_execution_id = %id, status = %record.status, "late response discarded");
            return Ok(());
        }
        let mut received = record.parked_responses.clone();
        received.extend(responses);
        let responses = received;

        self.inner.timeouts.disarm(id).await?;
        let node = self.plan_node(&record)?;

        if let Some(failure) = timeout_failure(&responses) {
            let outcome = self
                .inner
                .machine
                .transition(id, Status::Expired, TransitionSource::Timeout, |n| {
                    n.failure = Some(failure.clone());
                    n.parked_responses.clear();
                })
                .await?;
            if let Some((from, expired)) = outcome.applied() {
                tracing::warn!(node_execution_id = %id, node_id = %expired.node_id, "node expired");
                self.after_transition(from, &expired, TransitionSource::Timeout)
                    .await?;
            }
            return Ok(());
        }

        let Some(step) = self.inner.steps.get(node.step_type.as_str()) else {
            let failure = FailureInfo::configuration(format!("unknown step type '{}'", node.step_type));
            return self
                .complete(id, StepResponse::failed(failure), TransitionSource::Engine)
                .await;
        };

        let result = match record.mode {
            Some(ExecutionMode::Child | ExecutionMode::Children) => {
                let bundle = self.children_bundle(id).await?;
                step.resume_after_response(&record.ambiance, &node, &bundle)
                    .await
            }
            Some(ExecutionMode::TaskChain) => {
                let link = match &record.handle {
                    Some(ExecutableHandle::TaskChain { link_index, .. }) => *link_index,
                    _ => 0,
                };
                match step
                    .next_link(&record.ambiance, &node, link, &responses)
                    .await
                {
                    Ok(Some(next)) => {
                        let merged = aggregate_responses(&responses).outcomes;
                        self.inner
                            .machine
                            .update(id, |n| {
                                n.outcomes.extend(merged.clone());
                                n.parked_responses.clear();
                                true
                            })
                            .await?;
                        tracing::debug!(node_execution_id = %id, link = link + 1, "dispatching next chain link");
                        return self.dispatch_link(&record, &node, next, Some(link + 1)).await;
                    }
                    Ok(None) => {
                        step.resume_after_response(&record.ambiance, &node, &responses)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            _ => {
                step.resume_after_response(&record.ambiance, &node, &responses)
                    .await
            }
        };

        let response = result.unwrap_or_else(|e| step_error_response(&e));
        self.complete(id, response, TransitionSource::Response).await
    }

    /// Store responses on the node so they survive a restart. Responses for
    /// a node that no longer waits are not kept.
    pub(super) async fn record_responses(
        &self,
        id: Uuid,
        responses: &ResponseBundle,
    ) -> Result<(), EngineError> {
        self.inner
            .machine
            .update(id, |n| {
                let waiting = n.status == Status::Running
                    || n.status == Status::Paused
                    || n.status.is_response_waiting();
                if !waiting {
                    return false;
                }
                n.parked_responses.extend(responses.clone());
                true
            })
            .await?;
        Ok(())
    }

    /// Children's results keyed by plan node ID.
    async fn children_bundle(&self, parent_id: Uuid) -> Result<ResponseBundle, EngineError> {
        let children = self.inner.store.list_children(&parent_id).await?;
        Ok(children
            .into_iter()
            .map(|child| {
                let data = if child.counts_as_failure() {
                    let failure = child.failure.clone().unwrap_or_else(|| {
                        FailureInfo::new(
                            FailureKind::Unknown,
                            format!("node '{}' finished {}", child.node_id, child.status),
                        )
                    });
                    ResponseData::failure(failure)
                } else {
                    ResponseData::success(outcomes_value(&child.outcomes))
                };
                (child.node_id, data)
            })
            .collect())
    }

    /// Record a step's final answer.
    async fn complete(
        &self,
        id: Uuid,
        response: StepResponse,
        source: TransitionSource,
    ) -> Result<(), EngineError> {
        let to = match response.status {
            s @ (Status::Succeeded | Status::Failed | Status::Errored | Status::Skipped) => s,
            other => {
                tracing::warn!(node_execution_id = %id, status = %other, "step reported a non-final status");
                Status::Errored
            }
        };
        let failure = response.failure.or_else(|| {
            to.is_failure()
                .then(|| FailureInfo::new(FailureKind::Unknown, format!("step finished {to}")))
        });
        let outcomes = response.outcomes;

        let outcome = self
            .inner
            .machine
            .transition(id, to, source, |n| {
                n.outcomes.extend(outcomes.clone());
                n.failure = failure.clone();
                n.parked_responses.clear();
            })
            .await?;
        match outcome.applied() {
            Some((from, record)) => {
                tracing::info!(
                    node_execution_id = %id,
                    node_id = %record.node_id,
                    status = %to,
                    "node finished"
                );
                self.after_transition(from, &record, source).await
            }
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // After a status change
    // -----------------------------------------------------------------------

    /// Bookkeeping every applied transition needs, then advising when the
    /// node reached a final status on its own.
    pub(super) async fn after_transition(
        &self,
        from: Status,
        record: &NodeExecution,
        source: TransitionSource,
    ) -> Result<(), EngineError> {
        self.settle(from, record).await?;
        let self_reported = matches!(
            source,
            TransitionSource::Engine
                | TransitionSource::Step
                | TransitionSource::Response
                | TransitionSource::Timeout
        );
        if record.status.is_final() && self_reported {
            self.advise(from, record).await?;
        }
        Ok(())
    }

    /// Release what a node holds once it stops making progress on its own.
    pub(super) async fn settle(&self, from: Status, record: &NodeExecution) -> Result<(), EngineError> {
        let to = record.status;
        if to.is_final() || to == Status::InterventionWaiting {
            self.inner.dispatcher.wait_engine().cancel_node(record.id);
            self.release_resources(record).await?;
        }
        if to.is_final() || from == Status::InterventionWaiting {
            self.inner.timeouts.disarm(record.id).await?;
        }
        Ok(())
    }

    pub(super) async fn release_resources(&self, record: &NodeExecution) -> Result<(), EngineError> {
        let Ok(node) = self.plan_node(record) else {
            return Ok(());
        };
        let consumer_id = record.id.to_string();
        if let Some(req) = &node.restraint {
            let granted = self
                .inner
                .constraints
                .release(&req.resource_key, &consumer_id)
                .await?;
            self.drive_granted(&granted);
        }
        if let Some(barrier) = &node.barrier {
            let key = barrier_key(record.plan_execution_id, barrier);
            self.inner.constraints.release(&key, &consumer_id).await?;
        }
        Ok(())
    }

    /// Complete a parent's join once every current child has concluded.
    pub(super) async fn check_join(&self, parent_id: Uuid) -> Result<(), EngineError> {
        let parent = self.node_execution(parent_id).await?;
        if parent.concluded_at.is_some()
            || !matches!(parent.mode, Some(ExecutionMode::Child | ExecutionMode::Children))
        {
            return Ok(());
        }
        let children = self.inner.store.list_children(&parent_id).await?;
        if children.is_empty() || children.iter().any(|c| c.concluded_at.is_none()) {
            return Ok(());
        }

        let correlation_id = children_correlation_id(parent_id);
        if let NotifyOutcome::Completed {
            node_execution_id,
            responses,
        } = self
            .inner
            .dispatcher
            .wait_engine()
            .notify(&correlation_id, ResponseData::success(serde_json::Value::Null))
        {
            tracing::debug!(node_execution_id = %parent_id, "children joined");
            self.submit(EngineCommand::Resume {
                node_execution_id,
                responses,
            });
        }
        Ok(())
    }
}
