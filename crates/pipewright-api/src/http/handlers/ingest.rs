//! Response ingestion from workers and external callers.
//!
//! Endpoints:
//! - POST /api/v1/tasks/{correlation_id}/response - Delegate task response
//! - POST /api/v1/callbacks/{correlation_id}      - Async callback
//!
//! Both answer 202 once the response is stored. Unknown or already consumed
//! correlation IDs are accepted and discarded.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pipewright_core::dispatch::NotifyOutcome;
use pipewright_types::execution::{FailureInfo, FailureKind};
use pipewright_types::task::ResponseData;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body posted by a worker or callback source.
#[derive(Debug, Deserialize)]
pub struct ResponseBody {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub failure: Option<FailureInfo>,
}

impl ResponseBody {
    fn into_response_data(self) -> ResponseData {
        if self.success {
            ResponseData::success(self.data)
        } else {
            ResponseData::failure(self.failure.unwrap_or_else(|| {
                FailureInfo::new(FailureKind::DelegateFailure, "worker reported failure")
            }))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestReceipt {
    pub correlation_id: String,
    /// `completed`, `pending` or `discarded`.
    pub outcome: &'static str,
}

fn outcome_label(outcome: &NotifyOutcome) -> &'static str {
    match outcome {
        NotifyOutcome::Completed { .. } => "completed",
        NotifyOutcome::Pending { .. } => "pending",
        NotifyOutcome::Discarded => "discarded",
    }
}

type IngestResult = Result<(StatusCode, Json<ApiResponse<IngestReceipt>>), AppError>;

async fn ingest(state: &AppState, correlation_id: String, body: ResponseBody) -> IngestResult {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let outcome = state
        .engine
        .ingest_response(&correlation_id, body.into_response_data())
        .await?;
    let label = outcome_label(&outcome);
    tracing::debug!(%correlation_id, outcome = label, "response ingested");

    let elapsed = start.elapsed().as_millis() as u64;
    let receipt = IngestReceipt {
        correlation_id,
        outcome: label,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(receipt, request_id, elapsed)),
    ))
}

/// POST /api/v1/tasks/{correlation_id}/response
pub async fn task_response(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
    Json(body): Json<ResponseBody>,
) -> IngestResult {
    ingest(&state, correlation_id, body).await
}

/// POST /api/v1/callbacks/{correlation_id}
pub async fn callback(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
    Json(body): Json<ResponseBody>,
) -> IngestResult {
    ingest(&state, correlation_id, body).await
}
