//! GET /api/v1/resources/{key}

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use pipewright_types::constraint::ResourceSnapshot;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Capacity, active permits and the consumer queue of a resource.
pub async fn get_resource(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<ResourceSnapshot>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let snapshot = state.engine.resource_snapshot(&key).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(snapshot, request_id, elapsed)))
}
