//! BoxStep -- object-safe dynamic dispatch wrapper for Step.
//!
//! 1. `StepDyn` is an object-safe mirror of `Step` with boxed futures
//! 2. Blanket-impl `StepDyn` for all `T: Step`
//! 3. `BoxStep` wraps `Box<dyn StepDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use pipewright_types::ambiance::Ambiance;
use pipewright_types::execution::{ExecutionMode, Outcomes, StepResponse};
use pipewright_types::plan::PlanNode;
use pipewright_types::task::{ResponseBundle, TaskRequest};

use super::{ExecutableResponse, Step, StepError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send + 'a>>;

/// Object-safe version of [`Step`] with boxed futures.
pub trait StepDyn: Send + Sync {
    fn facilitate_default(&self) -> ExecutionMode;

    fn execute_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        inputs: &'a Outcomes,
    ) -> BoxFuture<'a, ExecutableResponse>;

    fn resume_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        responses: &'a ResponseBundle,
    ) -> BoxFuture<'a, StepResponse>;

    fn next_link_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        completed_link: u32,
        responses: &'a ResponseBundle,
    ) -> BoxFuture<'a, Option<TaskRequest>>;
}

impl<T: Step> StepDyn for T {
    fn facilitate_default(&self) -> ExecutionMode {
        Step::facilitate_default(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        inputs: &'a Outcomes,
    ) -> BoxFuture<'a, ExecutableResponse> {
        Box::pin(self.execute(ambiance, node, inputs))
    }

    fn resume_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        responses: &'a ResponseBundle,
    ) -> BoxFuture<'a, StepResponse> {
        Box::pin(self.resume_after_response(ambiance, node, responses))
    }

    fn next_link_boxed<'a>(
        &'a self,
        ambiance: &'a Ambiance,
        node: &'a PlanNode,
        completed_link: u32,
        responses: &'a ResponseBundle,
    ) -> BoxFuture<'a, Option<TaskRequest>> {
        Box::pin(self.next_link(ambiance, node, completed_link, responses))
    }
}

/// Type-erased step, so steps of different types share one registry.
pub struct BoxStep {
    inner: Box<dyn StepDyn>,
}

impl BoxStep {
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self {
            inner: Box::new(step),
        }
    }

    pub fn facilitate_default(&self) -> ExecutionMode {
        self.inner.facilitate_default()
    }

    pub async fn execute(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
        inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        self.inner.execute_boxed(ambiance, node, inputs).await
    }

    pub async fn resume_after_response(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
        responses: &ResponseBundle,
    ) -> Result<StepResponse, StepError> {
        self.inner.resume_boxed(ambiance, node, responses).await
    }

    pub async fn next_link(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
        completed_link: u32,
        responses: &ResponseBundle,
    ) -> Result<Option<TaskRequest>, StepError> {
        self.inner
            .next_link_boxed(ambiance, node, completed_link, responses)
            .await
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep")
            .field("default_mode", &self.inner.facilitate_default())
            .finish()
    }
}
