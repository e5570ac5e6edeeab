//! HTTP request handlers for the REST API.

use uuid::Uuid;

use crate::http::error::AppError;

pub mod ingest;
pub mod interrupt;
pub mod node;
pub mod plan;
pub mod resource;

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}
