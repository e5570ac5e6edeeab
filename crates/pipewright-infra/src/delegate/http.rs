//! HTTP transport to a remote worker.
//!
//! Tasks are POSTed as JSON to `{base_url}/tasks`; the worker answers later
//! through the engine's response-ingestion endpoint. A 4xx reply is the
//! worker refusing the task, anything else that is not 2xx is a transport
//! failure.

use std::time::Duration;

use pipewright_core::dispatch::{DelegateClient, DispatchError};
use pipewright_types::config::DelegateConfig;
use pipewright_types::task::{DelegateTask, SubmitOutcome};

const USER_AGENT: &str = concat!("pipewright/", env!("CARGO_PKG_VERSION"));

/// `DelegateClient` speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDelegateClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDelegateClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Build a client from the `[delegate]` config section. `None` when no
    /// worker endpoint is configured.
    pub fn from_config(config: &DelegateConfig) -> Option<Self> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_secs(config.request_timeout_secs)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl DelegateClient for HttpDelegateClient {
    async fn submit(&self, task: &DelegateTask) -> Result<SubmitOutcome, DispatchError> {
        let url = format!("{}/tasks", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(SubmitOutcome::Accepted);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            tracing::debug!(
                correlation_id = %task.correlation_id,
                status = status.as_u16(),
                "worker refused task"
            );
            let reason = if body.trim().is_empty() {
                format!("worker refused task: HTTP {status}")
            } else {
                format!("worker refused task: HTTP {status}: {}", body.trim())
            };
            return Ok(SubmitOutcome::Rejected { reason });
        }

        Err(DispatchError::Transport(format!("HTTP {status} from {url}")))
    }

    async fn cancel(&self, correlation_id: &str) -> Result<(), DispatchError> {
        let url = format!("{}/tasks/{correlation_id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        // Already finished or unknown to the worker: nothing left to stop.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(DispatchError::Transport(format!(
                "HTTP {} from {url}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct Worker {
        received: Arc<Mutex<Vec<DelegateTask>>>,
        cancelled: Arc<Mutex<Vec<String>>>,
    }

    async fn accept(State(worker): State<Worker>, Json(task): Json<DelegateTask>) -> StatusCode {
        let refuse = task.task_type == "unsupported";
        let crash = task.task_type == "crash";
        worker.received.lock().unwrap().push(task);
        if refuse {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if crash {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::ACCEPTED
        }
    }

    async fn cancel_task(State(worker): State<Worker>, Path(id): Path<String>) -> StatusCode {
        worker.cancelled.lock().unwrap().push(id);
        StatusCode::NO_CONTENT
    }

    async fn spawn_worker() -> (String, Worker) {
        let worker = Worker::default();
        let app = Router::new()
            .route("/tasks", post(accept))
            .route("/tasks/{id}", delete(cancel_task))
            .with_state(worker.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), worker)
    }

    fn task(task_type: &str) -> DelegateTask {
        DelegateTask {
            correlation_id: format!("{}-0", Uuid::now_v7()),
            task_type: task_type.into(),
            payload: serde_json::json!({"cmd": "make"}),
            abstractions: Default::default(),
            plan_execution_id: Uuid::now_v7(),
            node_execution_id: Uuid::now_v7(),
            timeout_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_submit_accepted_and_cancel() {
        let (url, worker) = spawn_worker().await;
        let client = HttpDelegateClient::new(url, Duration::from_secs(5));
        assert!(!client.base_url().ends_with('/'));

        let t = task("shell");
        assert_eq!(client.submit(&t).await.unwrap(), SubmitOutcome::Accepted);
        assert_eq!(worker.received.lock().unwrap()[0], t);

        client.cancel(&t.correlation_id).await.unwrap();
        assert_eq!(*worker.cancelled.lock().unwrap(), vec![t.correlation_id.clone()]);
    }

    #[tokio::test]
    async fn test_client_error_is_rejection() {
        let (url, _worker) = spawn_worker().await;
        let client = HttpDelegateClient::new(url, Duration::from_secs(5));
        match client.submit(&task("unsupported")).await.unwrap() {
            SubmitOutcome::Rejected { reason } => assert!(reason.contains("422"), "{reason}"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let (url, _worker) = spawn_worker().await;
        let client = HttpDelegateClient::new(url, Duration::from_secs(5));
        let err = client.submit(&task("crash")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpDelegateClient::new(format!("http://{addr}"), Duration::from_secs(2));
        let err = client.submit(&task("shell")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[test]
    fn test_from_config_requires_base_url() {
        assert!(HttpDelegateClient::from_config(&DelegateConfig::default()).is_none());
        let config = DelegateConfig {
            base_url: Some("http://workers:8080".into()),
            request_timeout_secs: 3,
        };
        let client = HttpDelegateClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://workers:8080");
    }
}
