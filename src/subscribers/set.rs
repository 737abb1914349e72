//! # SubscriberSet: non-blocking fan-out over multiple subscribers.
//!
//! [`SubscriberSet`] drains the [`Bus`](crate::events::Bus) and distributes
//! each [`Event`] to every subscriber **without awaiting** their processing.
//!
//! ## What it guarantees
//! - Fan-out never blocks the publisher.
//! - Per-subscriber FIFO (queue order).
//! - Panics inside subscribers are caught and reported (isolation).
//!
//! ## What it does **not** guarantee
//! - No global ordering across different subscribers.
//! - No retries on per-subscriber queue overflow; the event is dropped for
//!   that subscriber and an overflow event is published.
//!
//! ## Diagram
//! ```text
//!    Bus ──► listener ──► emit(Arc<Event>)
//!                             ├────► [queue S1] ─► worker S1 ─► on_event()
//!                             ├────► [queue S2] ─► worker S2 ─► on_event()
//!                             └────► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};

use super::Subscribe;

/// Per-subscriber channel with metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the set, spawns one worker per subscriber, and spawns the
    /// bus listener that feeds them.
    ///
    /// The listener runs until the bus closes (all publishers dropped).
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Arc<Self> {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let s = Arc::clone(&sub);

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = s.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        eprintln!(
                            "[podvisor] subscriber '{}' panicked: {panic_err:?}",
                            s.name()
                        );
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        let set = Arc::new(Self {
            channels,
            workers,
            bus: bus.clone(),
        });
        set.spawn_listener(bus);
        set
    }

    /// Spawns the background task that drains the bus into the fan-out.
    ///
    /// The listener holds only a weak reference; dropping the set (or
    /// calling [`shutdown`](Self::shutdown)) ends it.
    fn spawn_listener(self: &Arc<Self>, bus: Bus) {
        let mut rx = bus.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let Some(set) = weak.upgrade() else { break };
                        set.emit_arc(Arc::new(ev));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    /// Fan-out one event to all subscribers (non-blocking).
    ///
    /// If a subscriber's queue is full or closed, the event is dropped for
    /// it and an overflow event is published. Dropped subscriber-plumbing
    /// events are not re-reported; that would feed back.
    pub fn emit_arc(&self, ev: Arc<Event>) {
        for channel in &self.channels {
            match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.report_drop(channel.name, "queue_full", ev.kind);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.report_drop(channel.name, "worker_closed", ev.kind);
                }
            }
        }
    }

    fn report_drop(&self, name: &'static str, reason: &'static str, kind: EventKind) {
        if matches!(
            kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        ) {
            return;
        }
        self.bus.publish(Event::subscriber_overflow(name, reason));
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Graceful shutdown: close all queues and await worker completion.
    ///
    /// Takes effect when the caller holds the last strong reference (the
    /// bus listener only holds a weak one).
    pub async fn shutdown(self: Arc<Self>) {
        if let Ok(set) = Arc::try_unwrap(self) {
            drop(set.channels);
            for h in set.workers {
                let _ = h.await;
            }
        }
    }
}
