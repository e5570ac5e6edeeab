//! Built-in facilitators.

use std::time::Duration;

use pipewright_types::execution::ExecutionMode;
use serde::Deserialize;

use super::{FacilitationContext, FacilitationError, Facilitator, FacilitatorResponse};

#[derive(Debug, Default, Deserialize)]
struct WaitParameters {
    #[serde(default)]
    initial_wait_ms: u64,
}

fn initial_wait(facilitator: &str, parameters: &serde_json::Value) -> Result<Duration, FacilitationError> {
    if parameters.is_null() {
        return Ok(Duration::ZERO);
    }
    let params: WaitParameters = serde_json::from_value(parameters.clone()).map_err(|e| {
        FacilitationError::InvalidParameters {
            facilitator: facilitator.to_string(),
            message: e.to_string(),
        }
    })?;
    Ok(Duration::from_millis(params.initial_wait_ms))
}

/// Always answers with one fixed mode (`sync`, `async`, `task`, ...).
#[derive(Debug, Clone, Copy)]
pub struct FixedModeFacilitator {
    mode: ExecutionMode,
}

impl FixedModeFacilitator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

impl Facilitator for FixedModeFacilitator {
    fn facilitate(
        &self,
        _ctx: &FacilitationContext<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<FacilitatorResponse>, FacilitationError> {
        Ok(Some(FacilitatorResponse {
            mode: self.mode,
            initial_wait: initial_wait(self.mode.as_str(), parameters)?,
        }))
    }
}

/// Defers to the step's own default mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFacilitator;

impl Facilitator for DefaultFacilitator {
    fn facilitate(
        &self,
        ctx: &FacilitationContext<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<FacilitatorResponse>, FacilitationError> {
        Ok(Some(FacilitatorResponse {
            mode: ctx.step_default,
            initial_wait: initial_wait("default", parameters)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_types::ambiance::Ambiance;
    use pipewright_types::plan::PlanNode;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn default_facilitator_follows_step() {
        let ambiance = Ambiance::new(Uuid::now_v7(), Uuid::now_v7());
        let node = PlanNode::new("w", "wait");
        let ctx = FacilitationContext {
            ambiance: &ambiance,
            node: &node,
            step_default: ExecutionMode::Async,
        };
        let r = DefaultFacilitator
            .facilitate(&ctx, &serde_json::Value::Null)
            .unwrap()
            .unwrap();
        assert_eq!(r.mode, ExecutionMode::Async);
        assert_eq!(r.initial_wait, Duration::ZERO);
    }

    #[test]
    fn bad_wait_parameter_is_rejected() {
        let ambiance = Ambiance::new(Uuid::now_v7(), Uuid::now_v7());
        let node = PlanNode::new("n", "noop");
        let ctx = FacilitationContext {
            ambiance: &ambiance,
            node: &node,
            step_default: ExecutionMode::Sync,
        };
        let err = FixedModeFacilitator::new(ExecutionMode::Sync)
            .facilitate(&ctx, &json!({"initial_wait_ms": "soon"}))
            .unwrap_err();
        assert!(matches!(err, FacilitationError::InvalidParameters { .. }));
    }
}
