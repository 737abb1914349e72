//! # Retry policies.
//!
//! - [`BackoffPolicy`] — how retry delays grow (pod requeues, watch restarts)
//! - [`JitterPolicy`] — optional randomization of those delays
//!
//! Pod placement retries use a deterministic doubling policy (no jitter) so
//! the delay sequence is predictable; watch restarts add equal jitter to
//! avoid synchronized reconnect storms.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
