//! Application error type mapping to HTTP status codes and envelope format.

use axum::response::{IntoResponse, Response};
use serde_json::json;

use pipewright_core::constraint::ConstraintError;
use pipewright_core::engine::EngineError;
use pipewright_core::interrupt::InterruptError;
use pipewright_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Validation(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    /// Machine code, message and optional details for the envelope.
    fn parts(&self) -> (&'static str, String, Option<serde_json::Value>) {
        match self {
            AppError::Validation(msg) => ("VALIDATION_ERROR", msg.clone(), None),
            AppError::Engine(e) => match e {
                EngineError::PlanExecutionNotFound(_)
                | EngineError::NodeExecutionNotFound(_)
                | EngineError::Repository(RepositoryError::NotFound)
                | EngineError::Interrupt(InterruptError::NotFound(_))
                | EngineError::Constraint(ConstraintError::UnknownResource(_)) => {
                    ("NOT_FOUND", e.to_string(), None)
                }
                EngineError::Interrupt(InterruptError::Rejected {
                    interrupt_id,
                    interrupt_type,
                    reason,
                }) => (
                    "INTERRUPT_REJECTED",
                    e.to_string(),
                    Some(json!({
                        "interrupt_id": interrupt_id,
                        "type": interrupt_type,
                        "reason": reason,
                    })),
                ),
                EngineError::Repository(RepositoryError::Conflict(_))
                | EngineError::Repository(RepositoryError::VersionConflict { .. }) => {
                    ("CONFLICT", e.to_string(), None)
                }
                EngineError::Plan(_)
                | EngineError::UnknownPlanNode(_)
                | EngineError::Constraint(ConstraintError::InvalidRequest { .. }) => {
                    ("VALIDATION_ERROR", e.to_string(), None)
                }
                EngineError::ShutDown => ("ENGINE_UNAVAILABLE", e.to_string(), None),
                _ => ("INTERNAL_ERROR", e.to_string(), None),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message, details) = self.parts();
        if code == "INTERNAL_ERROR" {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::debug!(code, error = %message, "request rejected");
        }
        ApiResponse::error(code, &message, details).into_response()
    }
}
