//! Builder for [`OrchestrationEngine`].

use std::sync::Arc;

use dashmap::DashMap;
use pipewright_types::config::EngineConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{EngineInner, OrchestrationEngine};
use crate::advise::{Adviser, AdviserRegistry};
use crate::constraint::ConstraintEngine;
use crate::dispatch::{
    BoxDelegateClient, DelegateClient, TaskDispatcher, UnconfiguredDelegate, WaitNotifyEngine,
};
use crate::event::EventBus;
use crate::facilitation::{Facilitator, FacilitatorRegistry};
use crate::interrupt::InterruptLedger;
use crate::repository::ExecutionStore;
use crate::state::StateMachine;
use crate::step::{Step, StepRegistry};
use crate::timeout::TimeoutTracker;

/// Collects the store, config, registries and delegate client an engine
/// runs with. Registries start with the built-ins; anything registered
/// here replaces a built-in of the same name.
pub struct EngineBuilder<S> {
    store: S,
    config: EngineConfig,
    steps: StepRegistry,
    facilitators: FacilitatorRegistry,
    advisers: AdviserRegistry,
    delegate: Option<BoxDelegateClient>,
}

impl<S: ExecutionStore> EngineBuilder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            steps: StepRegistry::with_builtins(),
            facilitators: FacilitatorRegistry::with_builtins(),
            advisers: AdviserRegistry::with_builtins(),
            delegate: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step<T: Step + 'static>(mut self, step_type: impl Into<String>, step: T) -> Self {
        self.steps.register(step_type, step);
        self
    }

    pub fn facilitator<F: Facilitator + 'static>(
        mut self,
        facilitator_type: impl Into<String>,
        facilitator: F,
    ) -> Self {
        self.facilitators.register(facilitator_type, facilitator);
        self
    }

    pub fn adviser<A: Adviser + 'static>(mut self, adviser_type: impl Into<String>, adviser: A) -> Self {
        self.advisers.register(adviser_type, adviser);
        self
    }

    /// Client used to hand tasks to remote workers. Without one, every task
    /// submission is rejected.
    pub fn delegate_client<C: DelegateClient + 'static>(mut self, client: C) -> Self {
        self.delegate = Some(BoxDelegateClient::new(client));
        self
    }

    pub fn build(self) -> OrchestrationEngine<S> {
        let bus = EventBus::new(self.config.event_bus_capacity);
        let delegate = self
            .delegate
            .unwrap_or_else(|| BoxDelegateClient::new(UnconfiguredDelegate));
        let dispatcher = TaskDispatcher::new(delegate, Arc::new(WaitNotifyEngine::new()), bus.clone());
        let (commands, receiver) = mpsc::unbounded_channel();

        let inner = EngineInner {
            machine: StateMachine::new(self.store.clone(), bus.clone()),
            timeouts: TimeoutTracker::new(self.store.clone(), bus.clone()),
            constraints: ConstraintEngine::new(self.store.clone(), bus.clone()),
            interrupts: InterruptLedger::new(self.store.clone(), bus.clone()),
            store: self.store,
            config: self.config,
            bus,
            steps: self.steps,
            facilitators: self.facilitators,
            advisers: self.advisers,
            dispatcher,
            plans: DashMap::new(),
            commands,
            receiver: std::sync::Mutex::new(Some(receiver)),
            cancel: CancellationToken::new(),
        };
        OrchestrationEngine {
            inner: Arc::new(inner),
        }
    }
}
