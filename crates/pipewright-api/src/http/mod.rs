//! REST API surface served by `pwr serve`.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
