//! Durable per-node deadlines.
//!
//! Timers are stored as [`TimeoutInstance`] records so they survive a
//! restart. The engine's background sweep calls [`TimeoutTracker::sweep`];
//! each due instance is claimed by deleting it, so a timer fires at most
//! once even with several sweepers.
//!
//! [`TimeoutInstance`]: pipewright_types::timeout::TimeoutInstance

mod tracker;

pub use tracker::TimeoutTracker;
