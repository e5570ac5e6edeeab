//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Plans
        .route("/plans", post(handlers::plan::start_plan))
        .route(
            "/plan-executions/{id}",
            get(handlers::plan::get_plan_execution),
        )
        .route(
            "/plan-executions/{id}/nodes",
            get(handlers::plan::list_nodes),
        )
        .route(
            "/plan-executions/{id}/interrupts",
            get(handlers::interrupt::list_interrupts),
        )
        .route(
            "/plan-executions/{id}/fail",
            post(handlers::plan::fail_plan_execution),
        )
        .route(
            "/node-executions/{id}",
            get(handlers::node::get_node_execution),
        )
        // Interrupts
        .route("/interrupts", post(handlers::interrupt::register_interrupt))
        // Response ingestion
        .route(
            "/tasks/{correlation_id}/response",
            post(handlers::ingest::task_response),
        )
        .route(
            "/callbacks/{correlation_id}",
            post(handlers::ingest::callback),
        )
        // Resources
        .route("/resources/{key}", get(handlers::resource::get_resource))
        .route("/health", get(health_check));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        _dir: TempDir,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = TempDir::new().unwrap();
            let state = AppState::open(dir.path().to_path_buf()).await.unwrap();
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, build_router(state)).await.unwrap();
            });
            Self {
                base: format!("http://{addr}"),
                client: reqwest::Client::new(),
                _dir: dir,
            }
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self.client.get(format!("{}{path}", self.base)).send().await.unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn node_status(&self, pe: &str, node_id: &str) -> Option<String> {
            let (_, body) = self.get(&format!("/api/v1/plan-executions/{pe}/nodes")).await;
            body["data"]
                .as_array()?
                .iter()
                .find(|n| n["node_id"] == node_id)
                .and_then(|n| n["status"].as_str().map(str::to_string))
        }

        async fn wait_for(&self, pe: &str, node_id: &str, status: &str) {
            for _ in 0..200 {
                if self.node_status(pe, node_id).await.as_deref() == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            panic!("{node_id} never reached {status}");
        }

        async fn wait_for_plan(&self, pe: &str, status: &str) {
            for _ in 0..200 {
                let (_, body) = self.get(&format!("/api/v1/plan-executions/{pe}")).await;
                if body["data"]["status"] == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            panic!("plan {pe} never reached {status}");
        }
    }

    fn gate_plan(callback: &str) -> Value {
        json!({
            "root_node_id": "gate",
            "nodes": [{
                "id": "gate",
                "step_type": "wait",
                "step_parameters": {"callback_ids": [callback]},
            }],
        })
    }

    #[tokio::test]
    async fn test_health_is_served_at_both_paths() {
        let server = TestServer::start().await;
        for path in ["/health", "/api/v1/health"] {
            let (status, body) = server.get(path).await;
            assert_eq!(status, 200);
            assert_eq!(body["status"], "ok");
        }
    }

    #[tokio::test]
    async fn test_fork_plan_runs_to_success() {
        let server = TestServer::start().await;
        let plan = json!({
            "root_node_id": "root",
            "nodes": [
                {"id": "root", "step_type": "fork", "step_parameters": {"children": ["a", "b"]}},
                {"id": "a", "step_type": "noop"},
                {"id": "b", "step_type": "noop"},
            ],
        });

        let (status, body) = server.post("/api/v1/plans", plan).await;
        assert_eq!(status, 200);
        let pe = body["data"]["plan_execution_id"].as_str().unwrap().to_string();
        let root = body["data"]["root_node_execution_id"].as_str().unwrap().to_string();
        assert!(body["_links"]["nodes"].as_str().unwrap().ends_with("/nodes"));

        server.wait_for_plan(&pe, "succeeded").await;
        let (_, nodes) = server.get(&format!("/api/v1/plan-executions/{pe}/nodes")).await;
        assert_eq!(nodes["data"].as_array().unwrap().len(), 3);

        let (status, node) = server.get(&format!("/api/v1/node-executions/{root}")).await;
        assert_eq!(status, 200);
        assert_eq!(node["data"]["status"], "succeeded");
        assert_eq!(node["data"]["node_id"], "root");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let server = TestServer::start().await;
        let missing = uuid::Uuid::now_v7();

        let (status, body) = server.get(&format!("/api/v1/node-executions/{missing}")).await;
        assert_eq!(status, 404);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");

        let (status, _) = server.get(&format!("/api/v1/plan-executions/{missing}/nodes")).await;
        assert_eq!(status, 404);

        let (status, body) = server.get("/api/v1/node-executions/not-a-uuid").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_callback_completes_wait_and_duplicate_is_discarded() {
        let server = TestServer::start().await;
        let (_, body) = server.post("/api/v1/plans", gate_plan("cb-http")).await;
        let pe = body["data"]["plan_execution_id"].as_str().unwrap().to_string();
        server.wait_for(&pe, "gate", "async_waiting").await;

        let (status, body) = server
            .post("/api/v1/callbacks/cb-http", json!({"success": true, "data": {"ok": true}}))
            .await;
        assert_eq!(status, 202);
        assert_eq!(body["data"]["outcome"], "completed");

        let (status, body) = server
            .post("/api/v1/callbacks/cb-http", json!({"success": true}))
            .await;
        assert_eq!(status, 202);
        assert_eq!(body["data"]["outcome"], "discarded");

        server.wait_for_plan(&pe, "succeeded").await;
    }

    #[tokio::test]
    async fn test_unknown_task_response_is_accepted() {
        let server = TestServer::start().await;
        let (status, body) = server
            .post("/api/v1/tasks/nobody-asked/response", json!({"success": false}))
            .await;
        assert_eq!(status, 202);
        assert_eq!(body["data"]["outcome"], "discarded");
    }

    #[tokio::test]
    async fn test_resume_without_pause_is_conflict() {
        let server = TestServer::start().await;
        let (_, body) = server.post("/api/v1/plans", gate_plan("cb-resume")).await;
        let pe = body["data"]["plan_execution_id"].as_str().unwrap().to_string();
        server.wait_for(&pe, "gate", "async_waiting").await;

        let (status, body) = server
            .post(
                "/api/v1/interrupts",
                json!({"type": "resume", "plan_execution_id": pe}),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["errors"][0]["code"], "INTERRUPT_REJECTED");
        assert_eq!(body["errors"][0]["details"]["type"], "resume");

        let (_, log) = server.get(&format!("/api/v1/plan-executions/{pe}/interrupts")).await;
        assert_eq!(log["data"][0]["state"], "rejected");
    }

    #[tokio::test]
    async fn test_abort_interrupt_finishes_plan() {
        let server = TestServer::start().await;
        let (_, body) = server.post("/api/v1/plans", gate_plan("cb-abort")).await;
        let pe = body["data"]["plan_execution_id"].as_str().unwrap().to_string();
        server.wait_for(&pe, "gate", "async_waiting").await;

        let (status, body) = server
            .post(
                "/api/v1/interrupts",
                json!({
                    "type": "abort",
                    "plan_execution_id": pe,
                    "issued_by": {"source": "manual", "user": "ops"},
                }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["state"], "applied");
        server.wait_for_plan(&pe, "aborted").await;
    }

    #[tokio::test]
    async fn test_unknown_resource_is_not_found() {
        let server = TestServer::start().await;
        let (status, body) = server.get("/api/v1/resources/nope").await;
        assert_eq!(status, 404);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_plan_with_missing_root_is_rejected() {
        let server = TestServer::start().await;
        let plan = json!({
            "root_node_id": "missing",
            "nodes": [{"id": "a", "step_type": "noop"}],
        });
        let (status, body) = server.post("/api/v1/plans", plan).await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }
}
