//! Adviser registry for runtime lookup by adviser type.

use std::collections::HashMap;
use std::sync::Arc;

use super::Adviser;
use super::builtin::{
    FixedActionAdviser, ManualInterventionAdviser, NextStepAdviser, OnFailAdviser, RetryAdviser,
};
use pipewright_types::advise::AdviseAction;

/// Registry of advisers, indexed by type.
pub struct AdviserRegistry {
    advisers: HashMap<String, Arc<dyn Adviser>>,
}

impl AdviserRegistry {
    pub fn new() -> Self {
        Self {
            advisers: HashMap::new(),
        }
    }

    /// `next_step`, `retry`, `on_fail`, `manual_intervention`, `abort`,
    /// `ignore` and `mark_success`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("next_step", NextStepAdviser);
        registry.register("retry", RetryAdviser);
        registry.register("on_fail", OnFailAdviser);
        registry.register("manual_intervention", ManualInterventionAdviser);
        registry.register("abort", FixedActionAdviser::new(AdviseAction::Abort));
        registry.register("ignore", FixedActionAdviser::new(AdviseAction::Ignore));
        registry.register("mark_success", FixedActionAdviser::new(AdviseAction::MarkSuccess));
        registry
    }

    /// Register an adviser, replacing any existing one of the same type.
    pub fn register<A: Adviser + 'static>(&mut self, adviser_type: impl Into<String>, adviser: A) {
        self.advisers.insert(adviser_type.into(), Arc::new(adviser));
    }

    pub fn get(&self, adviser_type: &str) -> Option<Arc<dyn Adviser>> {
        self.advisers.get(adviser_type).cloned()
    }

    pub fn contains(&self, adviser_type: &str) -> bool {
        self.advisers.contains_key(adviser_type)
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.advisers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for AdviserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
