//! Node lifecycle state machine: the transition table plus the
//! compare-and-swap applier every status-producing source goes through.

pub mod machine;
pub mod transition;

pub use machine::{StateMachine, TransitionError, TransitionOutcome};
pub use transition::{TransitionSource, is_legal};
