//! Hands delegate tasks to the remote worker and routes what comes back.

use std::sync::Arc;

use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::{FailureInfo, FailureKind};
use pipewright_types::task::{DelegateTask, ResponseData, SubmitOutcome};
use uuid::Uuid;

use super::client::BoxDelegateClient;
use super::wait::{NotifyOutcome, WaitNotifyEngine};
use super::DispatchError;
use crate::event::EventBus;

pub struct TaskDispatcher {
    client: Arc<BoxDelegateClient>,
    wait: Arc<WaitNotifyEngine>,
    bus: EventBus,
}

impl TaskDispatcher {
    pub fn new(client: BoxDelegateClient, wait: Arc<WaitNotifyEngine>, bus: EventBus) -> Self {
        Self {
            client: Arc::new(client),
            wait,
            bus,
        }
    }

    /// Register the node as the waiter for the task's correlation ID.
    ///
    /// Done before the node is marked TASK_WAITING and before submission, so
    /// a worker answering immediately is never mistaken for a stray response.
    pub fn expect(&self, task: &DelegateTask) -> Result<(), DispatchError> {
        self.wait
            .wait_for_all(task.node_execution_id, std::slice::from_ref(&task.correlation_id))
    }

    /// Submit a task whose wait is already registered.
    ///
    /// A refusal (or transport error) is delivered on the task's own
    /// correlation as a `DelegateRejected` failure; the returned outcome says
    /// whether that failure completed the wait.
    pub async fn submit(&self, task: &DelegateTask) -> Option<NotifyOutcome> {
        let reason = match self.client.submit(task).await {
            Ok(SubmitOutcome::Accepted) => {
                tracing::info!(
                    node_execution_id = %task.node_execution_id,
                    correlation_id = %task.correlation_id,
                    task_type = %task.task_type,
                    "task dispatched"
                );
                self.bus.publish(OrchestrationEvent::TaskDispatched {
                    node_execution_id: task.node_execution_id,
                    correlation_id: task.correlation_id.clone(),
                    task_type: task.task_type.clone(),
                });
                return None;
            }
            Ok(SubmitOutcome::Rejected { reason }) => reason,
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            node_execution_id = %task.node_execution_id,
            correlation_id = %task.correlation_id,
            reason = %reason,
            "task submission rejected"
        );
        Some(self.wait.notify(
            &task.correlation_id,
            ResponseData::failure(FailureInfo::new(
                FailureKind::DelegateRejected,
                format!("task '{}' rejected: {reason}", task.task_type),
            )),
        ))
    }

    /// Deliver a worker or callback response.
    pub fn ingest(&self, correlation_id: &str, data: ResponseData) -> NotifyOutcome {
        let outcome = self.wait.notify(correlation_id, data);
        if outcome == NotifyOutcome::Discarded {
            tracing::debug!(correlation_id, "response for unknown or resolved correlation discarded");
            self.bus.publish(OrchestrationEvent::ResponseDiscarded {
                correlation_id: correlation_id.to_string(),
            });
        }
        outcome
    }

    /// Resolve a correlation with a timeout failure.
    pub fn expire(&self, correlation_id: &str) -> NotifyOutcome {
        self.wait.notify(
            correlation_id,
            ResponseData::failure(FailureInfo::timeout(format!(
                "no response on '{correlation_id}' before the deadline"
            ))),
        )
    }

    /// Stop waiting for a node. With `remote` set, the worker is asked to
    /// cancel too, without waiting for its acknowledgement.
    pub fn abort(&self, node_execution_id: Uuid, remote: bool) {
        let outstanding = self.wait.cancel_node(node_execution_id);
        if !remote {
            return;
        }
        for correlation_id in outstanding {
            let client = Arc::clone(&self.client);
            tokio::spawn(async move {
                if let Err(e) = client.cancel(&correlation_id).await {
                    tracing::warn!(correlation_id = %correlation_id, error = %e, "task cancel failed");
                }
            });
        }
    }

    pub fn wait_engine(&self) -> &Arc<WaitNotifyEngine> {
        &self.wait
    }
}
