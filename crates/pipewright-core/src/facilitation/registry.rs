//! Facilitator registry for runtime lookup by facilitator type.

use std::collections::HashMap;
use std::sync::Arc;

use super::Facilitator;
use super::builtin::{DefaultFacilitator, FixedModeFacilitator};
use pipewright_types::execution::ExecutionMode;

/// Registry of facilitators, indexed by type.
pub struct FacilitatorRegistry {
    facilitators: HashMap<String, Arc<dyn Facilitator>>,
}

impl FacilitatorRegistry {
    pub fn new() -> Self {
        Self {
            facilitators: HashMap::new(),
        }
    }

    /// `sync`, `async`, `task`, `task_chain`, `child`, `children`, `default`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for mode in [
            ExecutionMode::Sync,
            ExecutionMode::Async,
            ExecutionMode::Task,
            ExecutionMode::TaskChain,
            ExecutionMode::Child,
            ExecutionMode::Children,
        ] {
            registry.register(mode.as_str(), FixedModeFacilitator::new(mode));
        }
        registry.register("default", DefaultFacilitator);
        registry
    }

    /// Register a facilitator, replacing any existing one of the same type.
    pub fn register<F: Facilitator + 'static>(&mut self, facilitator_type: impl Into<String>, facilitator: F) {
        self.facilitators
            .insert(facilitator_type.into(), Arc::new(facilitator));
    }

    pub fn get(&self, facilitator_type: &str) -> Option<Arc<dyn Facilitator>> {
        self.facilitators.get(facilitator_type).cloned()
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.facilitators.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FacilitatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
