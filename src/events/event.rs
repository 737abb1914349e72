//! # Scheduling events emitted by the core.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Placement events**: the contract surface (`scheduled`,
//!   `failedScheduling`, `killing`, `killed`, `lost`) — their reason strings
//!   are stable and matched by consumers
//! - **Offer events**: offer registry lifecycle (added, declined, rescinded)
//! - **Queue/watch events**: requeues with backoff, watch restarts, resyncs
//! - **Process events**: leadership and termination
//!
//! The [`Event`] struct carries optional metadata: pod, task id, node,
//! offer id, error text, backoff delay, attempt count.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can order events correctly even when they
//! are delivered through independent async channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Event severity, mirrored into log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Routine lifecycle.
    Info,
    /// Something went wrong but the scheduler keeps going.
    Warn,
}

/// Classification of scheduling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Placement (contract reasons) ===
    /// Pod was bound to a node and its task launched.
    Scheduled,
    /// Placement attempt failed; the pod was requeued with backoff.
    FailedScheduling,
    /// Deletion of a launched pod requested; kill sent to the driver.
    Killing,
    /// Kill completed; the task reached its terminal status.
    Killed,
    /// Task was lost by the cluster manager or failed outside our control.
    Lost,

    // === Offer registry ===
    /// Offer entered the registry.
    OfferAdded,
    /// Offer aged out and was declined back to the driver.
    OfferDeclined,
    /// Offer was rescinded by the cluster manager.
    OfferRescinded,

    // === Queue / watch ===
    /// Pod admitted to the scheduling queue.
    PodQueued,
    /// Pod scheduled to back off before its next placement attempt.
    BackoffScheduled,
    /// Watch stream failed and will be restarted after a delay.
    WatchRestarted,
    /// Full relist completed.
    Resynced,

    // === Process ===
    /// This process won the election; scheduling work may start.
    ElectedMaster,
    /// Leadership was lost; the driver is aborted and everything unwinds.
    LeadershipLost,
    /// The terminal signal closed; all components are shutting down.
    TerminalClosed,
    /// Driver lost its connection to the cluster manager.
    Disconnected,
    /// A status update asked for an illegal state transition and was ignored.
    IllegalStatus,

    // === Subscriber plumbing ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,
}

impl EventKind {
    /// Stable reason string. For the placement kinds this is a consumer
    /// contract; the rest are informational.
    pub fn reason(&self) -> &'static str {
        match self {
            EventKind::Scheduled => "scheduled",
            EventKind::FailedScheduling => "failedScheduling",
            EventKind::Killing => "killing",
            EventKind::Killed => "killed",
            EventKind::Lost => "lost",
            EventKind::OfferAdded => "offerAdded",
            EventKind::OfferDeclined => "offerDeclined",
            EventKind::OfferRescinded => "offerRescinded",
            EventKind::PodQueued => "podQueued",
            EventKind::BackoffScheduled => "backoffScheduled",
            EventKind::WatchRestarted => "watchRestarted",
            EventKind::Resynced => "resynced",
            EventKind::ElectedMaster => "electedMaster",
            EventKind::LeadershipLost => "leadershipLost",
            EventKind::TerminalClosed => "terminalClosed",
            EventKind::Disconnected => "disconnected",
            EventKind::IllegalStatus => "illegalStatus",
            EventKind::SubscriberPanicked => "subscriberPanicked",
            EventKind::SubscriberOverflow => "subscriberOverflow",
        }
    }

    /// Severity attached to this kind.
    pub fn severity(&self) -> Severity {
        match self {
            EventKind::FailedScheduling
            | EventKind::Lost
            | EventKind::LeadershipLost
            | EventKind::Disconnected
            | EventKind::IllegalStatus
            | EventKind::SubscriberPanicked
            | EventKind::SubscriberOverflow => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

/// Scheduling event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Pod identity (`namespace/name`), if applicable.
    pub pod: Option<String>,
    /// Task id, if a task record is involved.
    pub task_id: Option<String>,
    /// Node hostname, if a placement is involved.
    pub node: Option<String>,
    /// Offer id, if an offer is involved.
    pub offer: Option<String>,
    /// Error or cause text, if the event represents a failure.
    pub error: Option<String>,
    /// Backoff delay before the next attempt, if relevant.
    pub delay: Option<Duration>,
    /// Placement attempt count (starting from 1).
    pub attempt: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pod: None,
            task_id: None,
            node: None,
            offer: None,
            error: None,
            delay: None,
            attempt: None,
        }
    }

    /// Attaches a pod identity.
    pub fn with_pod(mut self, pod: impl ToString) -> Self {
        self.pod = Some(pod.to_string());
        self
    }

    /// Attaches a task id.
    pub fn with_task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// Attaches a node hostname.
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attaches an offer id.
    pub fn with_offer(mut self, offer: impl Into<String>) -> Self {
        self.offer = Some(offer.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches an attempt count.
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_task_id(subscriber)
            .with_error(info)
    }
}
