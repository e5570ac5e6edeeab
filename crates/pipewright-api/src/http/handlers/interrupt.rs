//! Interrupt HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/interrupts                        - Register an interrupt
//! - GET  /api/v1/plan-executions/{id}/interrupts   - Interrupt log of a plan execution

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pipewright_types::interrupt::{Interrupt, InterruptType, IssuedBy};

use crate::http::error::AppError;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for registering an interrupt. Shared with the CLI client.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterInterruptRequest {
    #[serde(rename = "type")]
    pub interrupt_type: InterruptType,
    pub plan_execution_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<IssuedBy>,
}

/// POST /api/v1/interrupts - Register an interrupt.
///
/// Rejections are recorded in the interrupt log and answered with 409.
pub async fn register_interrupt(
    State(state): State<AppState>,
    Json(body): Json<RegisterInterruptRequest>,
) -> Result<Json<ApiResponse<Interrupt>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let interrupt = state
        .engine
        .register_interrupt(
            body.interrupt_type,
            body.plan_execution_id,
            body.node_execution_id,
            body.issued_by.unwrap_or_default(),
        )
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let log_link = format!("/api/v1/plan-executions/{}/interrupts", interrupt.plan_execution_id);
    Ok(Json(
        ApiResponse::success(interrupt, request_id, elapsed).with_link("interrupts", &log_link),
    ))
}

/// GET /api/v1/plan-executions/{id}/interrupts - Interrupt log in registration order.
pub async fn list_interrupts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Interrupt>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    state.engine.plan_execution(id).await?;
    let interrupts = state.engine.list_interrupts(id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(interrupts, request_id, elapsed)))
}
