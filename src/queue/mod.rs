//! # Pod queue: FCFS admission with per-pod backoff.

mod queuer;

pub use queuer::Queuer;
