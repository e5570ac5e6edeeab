//! Remote worker port.
//!
//! [`DelegateClient`] uses native async fn in traits; [`BoxDelegateClient`]
//! wraps it for dynamic dispatch through the object-safe
//! [`DelegateClientDyn`] with a blanket impl.

use std::future::Future;
use std::pin::Pin;

use pipewright_types::task::{DelegateTask, SubmitOutcome};
use tokio::sync::mpsc;

use super::DispatchError;

/// Contract for handing tasks to out-of-process workers.
///
/// The worker reports results later through the response-ingestion
/// endpoint, keyed by the task's correlation ID.
pub trait DelegateClient: Send + Sync {
    fn submit(
        &self,
        task: &DelegateTask,
    ) -> impl Future<Output = Result<SubmitOutcome, DispatchError>> + Send;

    /// Ask the worker to stop. Acknowledgement is not awaited by the engine.
    fn cancel(&self, correlation_id: &str) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`DelegateClient`] with boxed futures.
pub trait DelegateClientDyn: Send + Sync {
    fn submit_boxed<'a>(
        &'a self,
        task: &'a DelegateTask,
    ) -> BoxFuture<'a, Result<SubmitOutcome, DispatchError>>;

    fn cancel_boxed<'a>(&'a self, correlation_id: &'a str) -> BoxFuture<'a, Result<(), DispatchError>>;
}

impl<T: DelegateClient> DelegateClientDyn for T {
    fn submit_boxed<'a>(
        &'a self,
        task: &'a DelegateTask,
    ) -> BoxFuture<'a, Result<SubmitOutcome, DispatchError>> {
        Box::pin(self.submit(task))
    }

    fn cancel_boxed<'a>(&'a self, correlation_id: &'a str) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(self.cancel(correlation_id))
    }
}

/// Type-erased delegate client, selected at startup from configuration.
pub struct BoxDelegateClient {
    inner: Box<dyn DelegateClientDyn>,
}

impl BoxDelegateClient {
    pub fn new<T: DelegateClient + 'static>(client: T) -> Self {
        Self {
            inner: Box::new(client),
        }
    }

    pub async fn submit(&self, task: &DelegateTask) -> Result<SubmitOutcome, DispatchError> {
        self.inner.submit_boxed(task).await
    }

    pub async fn cancel(&self, correlation_id: &str) -> Result<(), DispatchError> {
        self.inner.cancel_boxed(correlation_id).await
    }
}

impl std::fmt::Debug for BoxDelegateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDelegateClient").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unconfigured
// ---------------------------------------------------------------------------

/// Used when no worker endpoint is configured: every submission is refused,
/// which fails the node through the normal advise path.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDelegate;

impl DelegateClient for UnconfiguredDelegate {
    async fn submit(&self, task: &DelegateTask) -> Result<SubmitOutcome, DispatchError> {
        tracing::warn!(
            correlation_id = %task.correlation_id,
            task_type = %task.task_type,
            "no remote worker configured, rejecting task"
        );
        Ok(SubmitOutcome::Rejected {
            reason: DispatchError::Unconfigured.to_string(),
        })
    }

    async fn cancel(&self, _correlation_id: &str) -> Result<(), DispatchError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

/// What an in-process worker receives.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateMessage {
    Submit(DelegateTask),
    Cancel(String),
}

/// Forwards tasks to an in-process worker over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegateClient {
    tx: mpsc::UnboundedSender<DelegateMessage>,
}

impl ChannelDelegateClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DelegateMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DelegateClient for ChannelDelegateClient {
    async fn submit(&self, task: &DelegateTask) -> Result<SubmitOutcome, DispatchError> {
        match self.tx.send(DelegateMessage::Submit(task.clone())) {
            Ok(()) => Ok(SubmitOutcome::Accepted),
            Err(_) => Ok(SubmitOutcome::Rejected {
                reason: "worker channel closed".to_string(),
            }),
        }
    }

    async fn cancel(&self, correlation_id: &str) -> Result<(), DispatchError> {
        self.tx
            .send(DelegateMessage::Cancel(correlation_id.to_string()))
            .map_err(|_| DispatchError::Transport("worker channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn task() -> DelegateTask {
        DelegateTask {
            correlation_id: "c-1".into(),
            task_type: "shell".into(),
            payload: serde_json::json!({"cmd": "make"}),
            abstractions: Default::default(),
            plan_execution_id: Uuid::now_v7(),
            node_execution_id: Uuid::now_v7(),
            timeout_secs: 60,
        }
    }

    #[tokio::test]
    async fn channel_client_forwards_and_rejects_when_closed() {
        let (client, mut rx) = ChannelDelegateClient::new();
        let boxed = BoxDelegateClient::new(client);
        assert_eq!(boxed.submit(&task()).await.unwrap(), SubmitOutcome::Accepted);
        assert!(matches!(rx.recv().await, Some(DelegateMessage::Submit(t)) if t.correlation_id == "c-1"));

        drop(rx);
        assert!(matches!(
            boxed.submit(&task()).await.unwrap(),
            SubmitOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn unconfigured_rejects() {
        let boxed = BoxDelegateClient::new(UnconfiguredDelegate);
        assert!(matches!(
            boxed.submit(&task()).await.unwrap(),
            SubmitOutcome::Rejected { reason } if reason.contains("no remote worker")
        ));
    }
}
