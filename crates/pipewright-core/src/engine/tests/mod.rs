//! End-to-end scenarios driving the engine over the in-memory store.

mod common;
mod fan_out_retry;
mod responses;
