//! Task dispatch and wait/notify.
//!
//! [`WaitNotifyEngine`] maps correlation IDs to the node execution waiting
//! on them and enforces exactly-once delivery: the first response on a
//! correlation consumes it, later ones are discarded. [`TaskDispatcher`]
//! hands delegate tasks to a remote worker through a [`DelegateClient`] and
//! routes responses, expiries and aborts through the wait engine.

pub mod client;
pub mod dispatcher;
pub mod wait;

pub use client::{
    BoxDelegateClient, ChannelDelegateClient, DelegateClient, DelegateMessage, UnconfiguredDelegate,
};
pub use dispatcher::TaskDispatcher;
pub use wait::{NotifyOutcome, WaitNotifyEngine};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("correlation id '{0}' is already being waited on")]
    DuplicateCorrelation(String),

    #[error("delegate transport error: {0}")]
    Transport(String),

    #[error("no remote worker configured")]
    Unconfigured,
}
