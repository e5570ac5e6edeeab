//! Step registry: step-type tag to implementation.

use std::collections::HashMap;
use std::sync::Arc;

use super::box_step::BoxStep;
use super::builtin::{DelegateStep, ForkStep, NoopStep, SectionStep, WaitStep};
use super::Step;

/// Registry of step implementations, indexed by step type.
///
/// Populated at startup; resolution is a plain map lookup.
pub struct StepRegistry {
    steps: HashMap<String, Arc<BoxStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Registry preloaded with the generic built-in steps.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("noop", NoopStep);
        registry.register("fork", ForkStep);
        registry.register("section", SectionStep);
        registry.register("delegate", DelegateStep);
        registry.register("wait", WaitStep);
        registry
    }

    /// Register a step under `step_type`, replacing any previous one.
    pub fn register<T: Step + 'static>(&mut self, step_type: impl Into<String>, step: T) {
        self.steps
            .insert(step_type.into(), Arc::new(BoxStep::new(step)));
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<BoxStep>> {
        self.steps.get(step_type).cloned()
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
