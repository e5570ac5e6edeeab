//! Facilitation: choosing how a node executes before it runs.
//!
//! Facilitators are resolved from the plan node's facilitator obtainments
//! through a registry keyed by facilitator type. Obtainments are evaluated
//! in declaration order and the first non-`None` response wins. A node
//! without obtainments uses its step's default mode. Facilitation never
//! performs the step's work.

pub mod builtin;
pub mod registry;

use std::time::Duration;

use pipewright_types::ambiance::Ambiance;
use pipewright_types::execution::ExecutionMode;
use pipewright_types::plan::PlanNode;

pub use registry::FacilitatorRegistry;

use crate::step::StepRegistry;

/// Configuration errors raised while facilitating. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum FacilitationError {
    #[error("unknown step type '{0}'")]
    UnknownStep(String),

    #[error("unknown facilitator type '{0}'")]
    UnknownFacilitator(String),

    #[error("no facilitator produced a mode for node '{0}'")]
    NoMode(String),

    #[error("invalid parameters for facilitator '{facilitator}': {message}")]
    InvalidParameters { facilitator: String, message: String },
}

/// Inputs every facilitator sees.
#[derive(Debug, Clone, Copy)]
pub struct FacilitationContext<'a> {
    pub ambiance: &'a Ambiance,
    pub node: &'a PlanNode,
    /// What the node's step would choose on its own.
    pub step_default: ExecutionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilitatorResponse {
    pub mode: ExecutionMode,
    /// Delay between facilitation and execution.
    pub initial_wait: Duration,
}

impl FacilitatorResponse {
    pub fn immediate(mode: ExecutionMode) -> Self {
        Self {
            mode,
            initial_wait: Duration::ZERO,
        }
    }
}

/// A facilitator either produces a mode deterministically or defers
/// (`Ok(None)`) to the next obtainment.
pub trait Facilitator: Send + Sync {
    fn facilitate(
        &self,
        ctx: &FacilitationContext<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<FacilitatorResponse>, FacilitationError>;
}

/// Resolves facilitators and steps for a node.
pub struct FacilitationEngine<'a> {
    facilitators: &'a FacilitatorRegistry,
    steps: &'a StepRegistry,
}

impl<'a> FacilitationEngine<'a> {
    pub fn new(facilitators: &'a FacilitatorRegistry, steps: &'a StepRegistry) -> Self {
        Self {
            facilitators,
            steps,
        }
    }

    pub fn facilitate(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
    ) -> Result<FacilitatorResponse, FacilitationError> {
        let step = self
            .steps
            .get(node.step_type.as_str())
            .ok_or_else(|| FacilitationError::UnknownStep(node.step_type.to_string()))?;
        let ctx = FacilitationContext {
            ambiance,
            node,
            step_default: step.facilitate_default(),
        };

        if node.facilitator_obtainments.is_empty() {
            return Ok(FacilitatorResponse::immediate(ctx.step_default));
        }

        for obtainment in &node.facilitator_obtainments {
            let facilitator = self
                .facilitators
                .get(&obtainment.facilitator_type)
                .ok_or_else(|| {
                    FacilitationError::UnknownFacilitator(obtainment.facilitator_type.clone())
                })?;
            if let Some(response) = facilitator.facilitate(&ctx, &obtainment.parameters)? {
                tracing::debug!(
                    node_id = %node.id,
                    facilitator = %obtainment.facilitator_type,
                    mode = %response.mode,
                    initial_wait_ms = response.initial_wait.as_millis() as u64,
                    "node facilitated"
                );
                return Ok(response);
            }
        }

        Err(FacilitationError::NoMode(node.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct Never;

    impl Facilitator for Never {
        fn facilitate(
            &self,
            _ctx: &FacilitationContext<'_>,
            _parameters: &serde_json::Value,
        ) -> Result<Option<FacilitatorResponse>, FacilitationError> {
            Ok(None)
        }
    }

    fn ambiance() -> Ambiance {
        Ambiance::new(Uuid::now_v7(), Uuid::now_v7())
    }

    #[test]
    fn no_obtainments_uses_step_default() {
        let facilitators = FacilitatorRegistry::with_builtins();
        let steps = StepRegistry::with_builtins();
        let engine = FacilitationEngine::new(&facilitators, &steps);

        let r = engine
            .facilitate(&ambiance(), &PlanNode::new("d", "delegate"))
            .unwrap();
        assert_eq!(r, FacilitatorResponse::immediate(ExecutionMode::Task));
    }

    #[test]
    fn first_non_null_response_wins() {
        let mut facilitators = FacilitatorRegistry::with_builtins();
        facilitators.register("never", Never);
        let steps = StepRegistry::with_builtins();
        let engine = FacilitationEngine::new(&facilitators, &steps);

        let node = PlanNode::new("n", "noop")
            .with_facilitator("never", json!({}))
            .with_facilitator("async", json!({"initial_wait_ms": 250}))
            .with_facilitator("sync", json!({}));
        let r = engine.facilitate(&ambiance(), &node).unwrap();
        assert_eq!(r.mode, ExecutionMode::Async);
        assert_eq!(r.initial_wait, Duration::from_millis(250));
    }

    #[test]
    fn unresolvable_facilitation_is_configuration_error() {
        let mut facilitators = FacilitatorRegistry::with_builtins();
        facilitators.register("never", Never);
        let steps = StepRegistry::with_builtins();
        let engine = FacilitationEngine::new(&facilitators, &steps);

        let unknown = PlanNode::new("n", "noop").with_facilitator("gpu", json!({}));
        assert!(matches!(
            engine.facilitate(&ambiance(), &unknown),
            Err(FacilitationError::UnknownFacilitator(t)) if t == "gpu"
        ));

        let all_none = PlanNode::new("n", "noop").with_facilitator("never", json!({}));
        assert!(matches!(
            engine.facilitate(&ambiance(), &all_none),
            Err(FacilitationError::NoMode(_))
        ));

        let bad_step = PlanNode::new("n", "terraform");
        assert!(matches!(
            engine.facilitate(&ambiance(), &bad_step),
            Err(FacilitationError::UnknownStep(_))
        ));
    }
}
