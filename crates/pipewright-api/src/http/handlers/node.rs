//! GET /api/v1/node-executions/{id}

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use pipewright_types::execution::NodeExecution;

use crate::http::error::AppError;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub async fn get_node_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<NodeExecution>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let node = state.engine.node_execution(id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let plan_link = format!("/api/v1/plan-executions/{}", node.plan_execution_id);
    Ok(Json(
        ApiResponse::success(node, request_id, elapsed)
            .with_link("self", &format!("/api/v1/node-executions/{id}"))
            .with_link("plan_execution", &plan_link),
    ))
}
