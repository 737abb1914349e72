//! # Backoff policy for retry delays.
//!
//! [`BackoffPolicy`] controls how delays grow after repeated failures. It is
//! parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! Two entry points cover the two retry shapes in the scheduler:
//! - [`next`](BackoffPolicy::next) derives a delay from the previous one
//!   (watch restarts, where the caller carries the last delay);
//! - [`delay_for`](BackoffPolicy::delay_for) derives a delay from a
//!   consecutive-failure count (pod requeues, where the queue carries the
//!   counter and clears it on a successful bind).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use podvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // Delay doubles per consecutive failure and caps at `max`.
//! assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
//! assert_eq!(backoff.delay_for(12), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to prevent thundering herd.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns the pod-retry policy: `first = 1s`, `factor = 2.0`,
    /// `max = 60s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the next delay based on the previous one.
    ///
    /// - If `prev` is `None`, returns `first` **clamped to `max`**.
    /// - Otherwise multiplies the previous delay by `factor` and caps at `max`.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if !mul.is_finite() {
                    self.max
                } else {
                    d.mul_f64(self.factor)
                }
            }
        };

        let base = if unclamped > self.max { self.max } else { unclamped };
        match self.jitter {
            JitterPolicy::Decorrelated => {
                let prev_for_jitter = prev.unwrap_or(self.first.min(self.max));
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), prev_for_jitter, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }

    /// Computes the delay for the n-th consecutive failure (1-based).
    ///
    /// `delay_for(n) = min(max, first * factor^(n-1))`, then jitter.
    /// `delay_for(0)` is zero: a pod with no recorded failures is retried
    /// immediately.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let scale = self.factor.powi(failures as i32 - 1);
        let grown = self.first.as_secs_f64() * scale;
        let base = if !grown.is_finite() || grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        self.jitter.apply(base)
    }
}
