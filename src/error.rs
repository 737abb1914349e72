//! # Error types used across the scheduling core.
//!
//! One taxonomy, [`SchedulerError`], covers every component surface. The
//! split that matters operationally is *retryable vs. not*:
//!
//! - Retryable against a different offer or after time (`BindFailed`,
//!   `LaunchFailed`, `OfferRescinded`, `NoSuitableOffer`) — the binder
//!   requeues the pod with backoff.
//! - Surfaced to the caller (`NoSuchPod`, `BadPodNaming`) — retries cannot
//!   resolve a misnamed or unknown pod.
//! - Quiet exits (`QueueClosed`, `Cancelled`) — a component unwinding during
//!   shutdown, not a failure.
//! - Fatal (`Driver`) — the HA process aborts and the process exits non-zero.
//!
//! `as_label` provides short stable labels for events and metrics.

use thiserror::Error;

use crate::pod::PodId;

/// Errors produced by the scheduling core.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Deletion referenced a pod the scheduler has never seen.
    #[error("no such pod: {pod}")]
    NoSuchPod {
        /// Identity the caller asked about.
        pod: PodId,
    },

    /// A non-terminal task already exists for this pod name.
    #[error("duplicate task for pod {pod}")]
    DuplicatePod {
        /// Identity that already owns a live task.
        pod: PodId,
    },

    /// A task-state update would move backwards or out of the state machine.
    #[error("illegal task state transition: {from} -> {to}")]
    IllegalTransition {
        /// State the task is in.
        from: &'static str,
        /// State the update asked for.
        to: &'static str,
    },

    /// The pod is missing its namespace or name.
    #[error("pod has no valid namespace/name")]
    BadPodNaming,

    /// The control plane refused or failed the bind call.
    #[error("bind failed: {reason}")]
    BindFailed {
        /// Free-form cause, carried into the `failedScheduling` event.
        reason: String,
    },

    /// The driver refused or failed the launch call.
    #[error("launch failed: {reason}")]
    LaunchFailed {
        /// Free-form cause, carried into the `failedScheduling` event.
        reason: String,
    },

    /// The chosen offer was rescinded before the launch was acknowledged.
    #[error("offer {offer} rescinded before launch")]
    OfferRescinded {
        /// The offer that went away.
        offer: String,
    },

    /// No live offer satisfies the pod's requirements right now.
    #[error("no suitable offer for pod {pod}")]
    NoSuitableOffer {
        /// The pod that could not be placed.
        pod: PodId,
    },

    /// The pod queue was closed; yield callers must exit.
    #[error("pod queue closed")]
    QueueClosed,

    /// The surrounding lifecycle window closed; blocking calls must return.
    #[error("cancelled")]
    Cancelled,

    /// Terminal driver failure; the HA process aborts on this.
    #[error("driver error: {reason}")]
    Driver {
        /// Message reported by the driver.
        reason: String,
    },
}

impl SchedulerError {
    /// Returns a short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::NoSuchPod { .. } => "no_such_pod",
            SchedulerError::DuplicatePod { .. } => "duplicate_pod",
            SchedulerError::IllegalTransition { .. } => "illegal_transition",
            SchedulerError::BadPodNaming => "bad_pod_naming",
            SchedulerError::BindFailed { .. } => "bind_failed",
            SchedulerError::LaunchFailed { .. } => "launch_failed",
            SchedulerError::OfferRescinded { .. } => "offer_rescinded",
            SchedulerError::NoSuitableOffer { .. } => "no_suitable_offer",
            SchedulerError::QueueClosed => "queue_closed",
            SchedulerError::Cancelled => "cancelled",
            SchedulerError::Driver { .. } => "driver_error",
        }
    }

    /// True when the operation may succeed against a different offer or
    /// after time; the binder requeues the pod with backoff in that case.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::BindFailed { .. }
                | SchedulerError::LaunchFailed { .. }
                | SchedulerError::OfferRescinded { .. }
                | SchedulerError::NoSuitableOffer { .. }
        )
    }

    /// True when a component should exit quietly rather than report.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SchedulerError::QueueClosed | SchedulerError::Cancelled)
    }
}
