//! # Global scheduler configuration.
//!
//! Provides [`Config`] — centralized settings for every component the
//! scheduler wires together.
//!
//! Config is used in two ways:
//! 1. **Facade creation**: `Scheduler::new(config, ...)`
//! 2. **Component knobs**: the queue, offer registry, reflector, and binder
//!    each read the fields that concern them.
//!
//! ## Sentinel values
//! - `driver_timeout = 0s` → no deadline on driver RPCs (not recommended)
//! - `resync = 0s` → periodic relisting disabled

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Global configuration for the scheduling core.
///
/// Defines:
/// - **Offer lifetime**: how long an unclaimed offer stays matchable
/// - **Retry behavior**: per-pod backoff between failed placement attempts
/// - **Watch behavior**: restart backoff and periodic resync
/// - **Driver RPCs**: deadline applied to bind/launch/kill calls
/// - **Event system**: bus capacity for event delivery
#[derive(Clone, Debug)]
pub struct Config {
    /// How long a fresh offer stays live past `listen_timeout` before the
    /// sweeper declines it back to the driver.
    pub offer_ttl: Duration,

    /// Grace window the cluster manager is given to route an offer to a
    /// listener; added to `offer_ttl` when computing expiry.
    pub listen_timeout: Duration,

    /// How often the sweeper scans for expired offers.
    pub sweep_interval: Duration,

    /// Per-pod retry backoff: initial 1s, doubled per consecutive failure,
    /// capped at 60s. A successful bind clears the counter.
    pub pod_backoff: BackoffPolicy,

    /// Backoff applied to watch restarts after a stream error, capped at 30s.
    pub watch_retry: BackoffPolicy,

    /// Interval between full relists that heal missed watch events.
    /// `Duration::ZERO` disables resync.
    pub resync: Duration,

    /// Deadline for each driver RPC (bind, launch, kill). On timeout the
    /// binder treats the call as failed and requeues the pod.
    /// `Duration::ZERO` means no deadline.
    pub driver_timeout: Duration,

    /// Capacity of the event bus broadcast ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` events will
    /// observe `Lagged` and skip older items. Minimum value is 1.
    pub bus_capacity: usize,

    /// Maximum time `end()` waits for components to unwind before the
    /// process gives up on a graceful stop.
    pub grace: Duration,
}

impl Config {
    /// Age past which a live offer expires and is declined.
    #[inline]
    pub fn offer_expiry(&self) -> Duration {
        self.listen_timeout + self.offer_ttl
    }

    /// Returns the driver RPC deadline as an `Option`.
    ///
    /// - `None` → no deadline
    /// - `Some(d)` → each RPC is wrapped in a timeout of `d`
    #[inline]
    pub fn driver_deadline(&self) -> Option<Duration> {
        if self.driver_timeout == Duration::ZERO {
            None
        } else {
            Some(self.driver_timeout)
        }
    }

    /// Returns the resync interval as an `Option`.
    #[inline]
    pub fn resync_interval(&self) -> Option<Duration> {
        if self.resync == Duration::ZERO {
            None
        } else {
            Some(self.resync)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `offer_ttl = 5s`, `listen_timeout = 5s` (offers expire at 10s)
    /// - `sweep_interval = 1s`
    /// - `pod_backoff = 1s..60s, factor 2.0, no jitter`
    /// - `watch_retry = 1s..30s, factor 2.0, equal jitter`
    /// - `resync = 10min`
    /// - `driver_timeout = 30s`
    /// - `bus_capacity = 1024`
    /// - `grace = 60s`
    fn default() -> Self {
        Self {
            offer_ttl: Duration::from_secs(5),
            listen_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            pod_backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(60),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            watch_retry: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(30),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
            resync: Duration::from_secs(600),
            driver_timeout: Duration::from_secs(30),
            bus_capacity: 1024,
            grace: Duration::from_secs(60),
        }
    }
}
