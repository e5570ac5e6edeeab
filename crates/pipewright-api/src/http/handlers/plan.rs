//! Plan execution HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/plans                        - Start a plan execution
//! - GET  /api/v1/plan-executions/{id}         - Get a plan execution
//! - GET  /api/v1/plan-executions/{id}/nodes   - List its node executions
//! - POST /api/v1/plan-executions/{id}/fail    - Error out every active node

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use pipewright_core::engine::PlanHandle;
use pipewright_types::execution::NodeExecution;
use pipewright_types::plan::{Plan, PlanExecution};

use crate::http::error::AppError;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NodeListQuery {
    #[serde(default)]
    pub include_retries: bool,
}

/// POST /api/v1/plans - Start a plan execution.
pub async fn start_plan(
    State(state): State<AppState>,
    Json(plan): Json<Plan>,
) -> Result<Json<ApiResponse<PlanHandle>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let handle = state.engine.start_plan(plan).await?;
    tracing::info!(
        plan_execution_id = %handle.plan_execution_id,
        "plan started over HTTP"
    );

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/plan-executions/{}", handle.plan_execution_id);
    let nodes_link = format!("{self_link}/nodes");
    Ok(Json(
        ApiResponse::success(handle, request_id, elapsed)
            .with_link("plan_execution", &self_link)
            .with_link("nodes", &nodes_link),
    ))
}

/// GET /api/v1/plan-executions/{id} - Get a plan execution.
pub async fn get_plan_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PlanExecution>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let execution = state.engine.plan_execution(id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/plan-executions/{id}");
    let nodes_link = format!("{self_link}/nodes");
    Ok(Json(
        ApiResponse::success(execution, request_id, elapsed)
            .with_link("self", &self_link)
            .with_link("nodes", &nodes_link),
    ))
}

/// GET /api/v1/plan-executions/{id}/nodes - List node executions.
pub async fn list_nodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<NodeListQuery>,
) -> Result<Json<ApiResponse<Vec<NodeExecution>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    // Surface a 404 for unknown executions instead of an empty list.
    state.engine.plan_execution(id).await?;
    let nodes = state
        .engine
        .list_node_executions(id, query.include_retries)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(nodes, request_id, elapsed)
            .with_link("plan_execution", &format!("/api/v1/plan-executions/{id}")),
    ))
}

/// POST /api/v1/plan-executions/{id}/fail - Error out every active node.
pub async fn fail_plan_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let transitioned = state.engine.fail_plan_execution(id).await?;
    tracing::warn!(plan_execution_id = %id, transitioned, "plan execution failed by operator");

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "plan_execution_id": id, "transitioned": transitioned }),
        request_id,
        elapsed,
    )))
}
