//! # Offer registry: live-offer bookkeeping.
//!
//! Tracks every offer from arrival to disposition. An offer is in exactly
//! one of three conditions: **live** (matchable), **consumed** (claimed by
//! an in-flight launch, awaiting [`launch_ack`](OfferRegistry::launch_ack)),
//! or **gone** (rescinded, declined on expiry, deleted, or acknowledged).
//!
//! ## Architecture
//! ```text
//! driver callbacks ──► add() / rescind()
//!                          │
//! binder ────────────► walk(visitor) ──► Consumed / Continue / Skip
//!        ────────────► launch_ack(id) ──► Ok | Err(OfferRescinded)
//!                          │
//! sweeper task ──────► expire_stale() ──► decline_offer() on the driver
//! ```
//!
//! ## Rules
//! - `walk` visits **live** offers only, in insertion order; it is the sole
//!   path by which a launch is decided.
//! - Walking and mutation serialize on the registry lock; the visitor runs
//!   under the write lock and must not block.
//! - `rescind` is idempotent. Rescinding a consumed offer does not interrupt
//!   the launch; the binder observes the failure at `launch_ack` and
//!   requeues the pod.
//! - `Skip` marks an offer unusable for this pass only; it stays live.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, Filters};
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::offers::{Offer, OfferId};

/// Decision returned by a walk visitor for one live offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkAction {
    /// Claim this offer; the walk stops and returns it.
    Consumed,
    /// Not interesting; keep walking.
    Continue,
    /// Usable in principle but not right now; keep walking, leave it live.
    Skip,
}

/// Result of one walk over the live offers.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// The offer the visitor consumed, if any.
    pub consumed: Option<Arc<Offer>>,
    /// Number of live offers visited.
    pub visited: usize,
    /// Number of offers the visitor skipped.
    pub skipped: usize,
}

/// Condition of one tracked offer.
enum OfferState {
    /// Matchable by the walk.
    Live,
    /// Claimed by an in-flight launch; `rescinded` flips if the cluster
    /// manager takes it back before the launch is acknowledged.
    Consumed { rescinded: bool },
}

struct Entry {
    offer: Arc<Offer>,
    state: OfferState,
    received_at: Instant,
}

struct Inner {
    /// Insertion order of offer ids; lazily compacted as entries go away.
    order: Vec<OfferId>,
    entries: HashMap<OfferId, Entry>,
}

/// Registry of resource offers with TTL expiry.
pub struct OfferRegistry {
    inner: RwLock<Inner>,
    bus: Bus,
    /// Age past which a live offer is declined.
    expiry: Duration,
}

impl OfferRegistry {
    /// Creates an empty registry.
    pub fn new(bus: Bus, expiry: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
            bus,
            expiry,
        })
    }

    /// Inserts an offer. Offers for a node already advertising coexist;
    /// re-adding a known offer id is a no-op.
    pub async fn add(&self, offer: Offer) {
        let id = offer.id.clone();
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(&id) {
            return;
        }
        inner.order.push(id.clone());
        inner.entries.insert(
            id.clone(),
            Entry {
                offer: Arc::new(offer),
                state: OfferState::Live,
                received_at: Instant::now(),
            },
        );
        drop(inner);
        self.bus
            .publish(Event::now(EventKind::OfferAdded).with_offer(id.to_string()));
    }

    /// Rescinds an offer. Idempotent; returns true if anything changed.
    ///
    /// A live offer is dropped immediately. A consumed offer stays tracked
    /// so the pending [`launch_ack`](Self::launch_ack) observes the failure.
    pub async fn rescind(&self, id: &OfferId) -> bool {
        let mut inner = self.inner.write().await;
        let (drop_entry, changed) = match inner.entries.get_mut(id) {
            None => (false, false),
            Some(entry) => match &mut entry.state {
                OfferState::Live => (true, true),
                OfferState::Consumed { rescinded } => {
                    let first = !*rescinded;
                    *rescinded = true;
                    (false, first)
                }
            },
        };
        if drop_entry {
            inner.entries.remove(id);
        }
        drop(inner);
        if changed {
            self.bus
                .publish(Event::now(EventKind::OfferRescinded).with_offer(id.to_string()));
        }
        changed
    }

    /// Drops an offer in any condition without declining it.
    ///
    /// The binder uses this to retire an offer whose bind attempt failed;
    /// `reason` is carried on the event the caller publishes, not here.
    pub async fn delete(&self, id: &OfferId) -> Option<Arc<Offer>> {
        let mut inner = self.inner.write().await;
        inner.entries.remove(id).map(|e| e.offer)
    }

    /// Drops every tracked offer. Used when the driver disconnects: offers
    /// do not survive a master failover.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.order.clear();
    }

    /// Walks live offers in insertion order, applying `visitor` until it
    /// consumes one or the offers run out.
    ///
    /// Consuming marks the offer claimed; it is no longer matchable but
    /// remains tracked until [`launch_ack`](Self::launch_ack).
    pub async fn walk<F>(&self, mut visitor: F) -> WalkOutcome
    where
        F: FnMut(&Offer) -> WalkAction,
    {
        let mut inner = self.inner.write().await;
        let mut outcome = WalkOutcome::default();

        // Compact the order vector while walking: ids whose entries are gone
        // are dropped here rather than on every removal.
        let mut kept: Vec<OfferId> = Vec::with_capacity(inner.order.len());
        let order: Vec<OfferId> = inner.order.drain(..).collect();
        for id in order {
            if !inner.entries.contains_key(&id) {
                continue;
            }
            kept.push(id.clone());

            if outcome.consumed.is_some() {
                continue;
            }
            let entry = inner.entries.get_mut(&id).unwrap();
            if !matches!(entry.state, OfferState::Live) {
                continue;
            }
            outcome.visited += 1;
            match visitor(&entry.offer) {
                WalkAction::Consumed => {
                    entry.state = OfferState::Consumed { rescinded: false };
                    outcome.consumed = Some(Arc::clone(&entry.offer));
                }
                WalkAction::Skip => outcome.skipped += 1,
                WalkAction::Continue => {}
            }
        }
        inner.order = kept;
        outcome
    }

    /// Finalizes a consumed offer ahead of the launch RPC.
    ///
    /// Fails with [`SchedulerError::OfferRescinded`] when the cluster
    /// manager took the offer back while the bind was in flight; the caller
    /// must requeue the pod. Either way the offer is gone afterwards.
    pub async fn launch_ack(&self, id: &OfferId) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        match inner.entries.remove(id) {
            Some(Entry {
                state: OfferState::Consumed { rescinded: false },
                ..
            }) => Ok(()),
            _ => Err(SchedulerError::OfferRescinded {
                offer: id.to_string(),
            }),
        }
    }

    /// Removes live offers older than the expiry and returns them so the
    /// caller can decline them back to the driver.
    pub async fn expire_stale(&self) -> Vec<Arc<Offer>> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let mut expired = Vec::new();
        inner.entries.retain(|_, entry| {
            let stale = matches!(entry.state, OfferState::Live)
                && now.duration_since(entry.received_at) > self.expiry;
            if stale {
                expired.push(Arc::clone(&entry.offer));
            }
            !stale
        });
        drop(inner);
        for offer in &expired {
            self.bus
                .publish(Event::now(EventKind::OfferDeclined).with_offer(offer.id.to_string()));
        }
        expired
    }

    /// Number of live (matchable) offers.
    pub async fn live_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter(|e| matches!(e.state, OfferState::Live))
            .count()
    }

    /// Returns the offer record, live or consumed.
    pub async fn get(&self, id: &OfferId) -> Option<Arc<Offer>> {
        let inner = self.inner.read().await;
        inner.entries.get(id).map(|e| Arc::clone(&e.offer))
    }

    /// Runs the TTL sweeper until the token is cancelled.
    ///
    /// Each pass declines expired offers back to the driver with the
    /// default refuse filter.
    pub async fn run_sweeper(
        self: Arc<Self>,
        driver: Arc<dyn Driver>,
        interval: Duration,
        token: CancellationToken,
    ) {
        let filters = Filters::default();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            for offer in self.expire_stale().await {
                if driver.decline_offer(&offer.id, &filters).await.is_err() {
                    // Nothing to recover; the master will re-offer after its
                    // own timeout even if the decline never lands.
                    break;
                }
            }
        }
    }
}
