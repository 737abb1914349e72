//! # Queuer: holds admissible pods and feeds the binder.
//!
//! The queue orders pods first-come-first-served and keeps an unschedulable
//! pod from busy-looping by backing it off after each failed placement
//! attempt: initial 1s, doubled per consecutive failure, capped at 60s. A
//! successful bind clears the counter.
//!
//! ## Architecture
//! ```text
//! reflector ──► admit() ─────────┐
//! binder ────► requeue(reason) ──┤──► entries (PodId → {pod, seq, gate})
//! deleter ───► dequeue() ────────┘           │
//!                                            ▼
//! binder ────► yield_pod() ──── blocks until a gate is open, pops FCFS
//! offers ────► offers_available() ── opens every gate early
//! ```
//!
//! ## Rules
//! - At most one entry per pod name; re-admitting replaces the snapshot but
//!   keeps the pod's place in line.
//! - `yield_pod` returns ready pods in admission order; a pod still in
//!   backoff cedes its slot to the next ready pod.
//! - An offer arrival opens the backoff gates (pods retry immediately) but
//!   does not reset failure counters, so the delay sequence is unchanged.
//! - `close()` fails all current and future `yield_pod` calls with
//!   `QueueClosed`; deletion removes a pod regardless of its state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::pod::{AdmissionVerdict, Pod, PodId};
use crate::policies::BackoffPolicy;

struct Entry {
    pod: Pod,
    /// Admission order; lower yields first among ready entries.
    seq: u64,
    /// Entry is ready once this instant has passed.
    backoff_until: Instant,
}

/// Per-pod state that outlives the entry's pop in `yield_pod`: the original
/// admission order (FCFS holds across failed attempts) and the
/// consecutive-failure counter that grows the backoff delay.
struct History {
    seq: u64,
    failures: u32,
}

struct Inner {
    entries: HashMap<PodId, Entry>,
    /// Cleared by a successful bind (`clear_backoff`) or a dequeue.
    history: HashMap<PodId, History>,
    next_seq: u64,
    closed: bool,
}

/// FCFS pod queue with per-pod backoff.
pub struct Queuer {
    inner: Mutex<Inner>,
    notify: Notify,
    backoff: BackoffPolicy,
    bus: Bus,
}

impl Queuer {
    /// Creates an empty, open queue.
    pub fn new(bus: Bus, backoff: BackoffPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                history: HashMap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            backoff,
            bus,
        })
    }

    /// Admits a pod if it passes the admission filter.
    ///
    /// Returns the verdict; only [`AdmissionVerdict::Admit`] enqueues. A pod
    /// already queued has its snapshot replaced and keeps its place in line.
    pub async fn admit(&self, pod: Pod) -> AdmissionVerdict {
        let verdict = pod.admission();
        if verdict != AdmissionVerdict::Admit {
            return verdict;
        }
        let id = pod.id();
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return verdict;
            }
            match inner.entries.get_mut(&id) {
                Some(entry) => entry.pod = pod,
                None => {
                    let seq = Self::pod_seq(&mut inner, &id);
                    inner.entries.insert(
                        id.clone(),
                        Entry {
                            pod,
                            seq,
                            backoff_until: Instant::now(),
                        },
                    );
                }
            }
        }
        self.bus
            .publish(Event::now(EventKind::PodQueued).with_pod(&id));
        self.notify.notify_waiters();
        verdict
    }

    /// Reinserts a pod after a failed placement attempt.
    ///
    /// Grows the consecutive-failure counter and gates the entry until the
    /// corresponding backoff delay has passed.
    pub async fn requeue(&self, pod: Pod, reason: &str) {
        let id = pod.id();
        let (delay, attempt) = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            let seq = Self::pod_seq(&mut inner, &id);
            let hist = inner.history.get_mut(&id).unwrap();
            hist.failures += 1;
            let attempt = hist.failures;
            let delay = self.backoff.delay_for(attempt);
            let gate = Instant::now() + delay;
            match inner.entries.get_mut(&id) {
                Some(entry) => {
                    entry.pod = pod;
                    entry.backoff_until = gate;
                }
                None => {
                    inner.entries.insert(
                        id.clone(),
                        Entry {
                            pod,
                            seq,
                            backoff_until: gate,
                        },
                    );
                }
            }
            (delay, attempt)
        };
        self.bus.publish(
            Event::now(EventKind::BackoffScheduled)
                .with_pod(&id)
                .with_delay(delay)
                .with_attempt(u64::from(attempt))
                .with_error(reason.to_string()),
        );
        self.notify.notify_waiters();
    }

    /// Removes a pod silently, whatever its state. Returns true if it was
    /// queued.
    pub async fn dequeue(&self, id: &PodId) -> bool {
        let mut inner = self.inner.lock().await;
        inner.history.remove(id);
        inner.entries.remove(id).is_some()
    }

    /// Forgets the pod's failure history; called after a successful bind.
    pub async fn clear_backoff(&self, id: &PodId) {
        let mut inner = self.inner.lock().await;
        inner.history.remove(id);
    }

    /// Looks up or allocates the pod's stable admission order.
    fn pod_seq(inner: &mut Inner, id: &PodId) -> u64 {
        if let Some(hist) = inner.history.get(id) {
            return hist.seq;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.history.insert(
            id.clone(),
            History { seq, failures: 0 },
        );
        seq
    }

    /// Opens every backoff gate: fresh offers mean stalled pods deserve an
    /// immediate retry. Failure counters are untouched.
    pub async fn offers_available(&self) {
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            for entry in inner.entries.values_mut() {
                if entry.backoff_until > now {
                    entry.backoff_until = now;
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// Blocks until a ready pod is available and pops it, FCFS.
    ///
    /// Fails with `QueueClosed` once [`close`](Self::close) is called and
    /// with `Cancelled` when the token fires.
    pub async fn yield_pod(&self, token: &CancellationToken) -> Result<Pod, SchedulerError> {
        loop {
            // Register for wakeups before inspecting state so a concurrent
            // admit/requeue cannot slip between the check and the wait.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_gate = {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(SchedulerError::QueueClosed);
                }
                let now = Instant::now();
                let ready = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| e.backoff_until <= now)
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(id, _)| id.clone());
                if let Some(id) = ready {
                    let entry = inner.entries.remove(&id).unwrap();
                    return Ok(entry.pod);
                }
                inner.entries.values().map(|e| e.backoff_until).min()
            };

            match next_gate {
                Some(gate) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(SchedulerError::Cancelled),
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(gate) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(SchedulerError::Cancelled),
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Closes the queue; all current and future yields fail `QueueClosed`.
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Snapshots the queue in yield order, with each pod's
    /// consecutive-failure count.
    ///
    /// Together with [`restore`](Self::restore) this lets a successor
    /// process rebuild the queue without losing FCFS order or backoff
    /// progress.
    pub async fn snapshot(&self) -> Vec<(Pod, u32)> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<(&PodId, &Entry)> = inner.entries.iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
            .into_iter()
            .map(|(id, e)| {
                let failures = inner.history.get(id).map_or(0, |h| h.failures);
                (e.pod.clone(), failures)
            })
            .collect()
    }

    /// Rebuilds the queue from a snapshot, preserving order and failure
    /// counts. Restored entries are gated by their failure count's delay,
    /// the same as a requeue would.
    pub async fn restore(&self, entries: Vec<(Pod, u32)>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            for (pod, failures) in entries {
                let id = pod.id();
                let seq = Self::pod_seq(&mut inner, &id);
                inner.history.get_mut(&id).unwrap().failures = failures;
                let gate = Instant::now() + self.backoff.delay_for(failures);
                inner.entries.insert(
                    id,
                    Entry {
                        pod,
                        seq,
                        backoff_until: gate,
                    },
                );
            }
        }
        self.notify.notify_waiters();
    }

    /// Number of queued pods (ready or gated).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// True if nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// True if the pod is currently queued.
    pub async fn contains(&self, id: &PodId) -> bool {
        self.inner.lock().await.entries.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queuer() -> Arc<Queuer> {
        Queuer::new(Bus::new(64), BackoffPolicy::default())
    }

    #[tokio::test]
    async fn yield_pops_in_admission_order() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        q.admit(Pod::new("default", "b")).await;

        assert_eq!(q.yield_pod(&token).await.unwrap().name, "a");
        assert_eq!(q.yield_pod(&token).await.unwrap().name, "b");
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn admission_filter_rejects_malformed_and_assigned() {
        let q = queuer();
        assert_eq!(q.admit(Pod::new("", "a")).await, AdmissionVerdict::MissingNamespace);
        assert_eq!(q.admit(Pod::new("default", "")).await, AdmissionVerdict::MissingName);
        assert_eq!(
            q.admit(Pod::new("default", "a").with_assigned_node("h1")).await,
            AdmissionVerdict::AlreadyAssigned,
        );
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn readmit_keeps_place_in_line() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a").with_request(1.0, 64.0)).await;
        q.admit(Pod::new("default", "b")).await;
        q.admit(Pod::new("default", "a").with_request(2.0, 128.0)).await;

        let first = q.yield_pod(&token).await.unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(first.request.cpus, 2.0);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_pod_waits_out_its_backoff() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        let pod = q.yield_pod(&token).await.unwrap();
        q.requeue(pod, "noFit").await;

        // Gate is 1s out; nothing is ready yet.
        assert!(
            tokio::time::timeout(Duration::from_millis(500), q.yield_pod(&token))
                .await
                .is_err()
        );
        tokio::time::advance(Duration::from_millis(600)).await;
        let pod = q.yield_pod(&token).await.unwrap();
        assert_eq!(pod.name, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_per_consecutive_failure() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;

        for expected_secs in [1u64, 2, 4] {
            let pod = q.yield_pod(&token).await.unwrap();
            q.requeue(pod, "noFit").await;
            assert!(
                tokio::time::timeout(
                    Duration::from_millis(expected_secs * 1000 - 100),
                    q.yield_pod(&token)
                )
                .await
                .is_err()
            );
            tokio::time::advance(Duration::from_millis(200)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_backoff_resets_the_sequence() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        let pod = q.yield_pod(&token).await.unwrap();
        q.requeue(pod, "noFit").await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let pod = q.yield_pod(&token).await.unwrap();

        q.clear_backoff(&pod.id()).await;
        q.requeue(pod, "noFit").await;

        // Counter restarted: the gate is 1s again, not 2s.
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(q.yield_pod(&token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn offer_arrival_opens_gates_without_resetting_counters() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        let pod = q.yield_pod(&token).await.unwrap();
        q.requeue(pod, "noFit").await;

        q.offers_available().await;
        let pod = q.yield_pod(&token).await.unwrap();

        // Counter kept growing: the next gate is 2s.
        q.requeue(pod, "noFit").await;
        assert!(
            tokio::time::timeout(Duration::from_millis(1500), q.yield_pod(&token))
                .await
                .is_err()
        );
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(q.yield_pod(&token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_keeps_original_admission_order() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        let pod = q.yield_pod(&token).await.unwrap();
        q.requeue(pod, "noFit").await;
        q.admit(Pod::new("default", "b")).await;

        // While "a" is gated, "b" takes the slot.
        assert_eq!(q.yield_pod(&token).await.unwrap().name, "b");
        q.admit(Pod::new("default", "b")).await;

        // Once the gate opens, "a" is back at the head of the line.
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(q.yield_pod(&token).await.unwrap().name, "a");
        assert_eq!(q.yield_pod(&token).await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn dequeue_removes_silently() {
        let q = queuer();
        q.admit(Pod::new("default", "a")).await;
        assert!(q.dequeue(&PodId::new("default", "a")).await);
        assert!(!q.dequeue(&PodId::new("default", "a")).await);
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_restore_preserves_order_and_backoff() {
        let q = queuer();
        let token = CancellationToken::new();
        q.admit(Pod::new("default", "a")).await;
        q.admit(Pod::new("default", "b")).await;
        q.admit(Pod::new("default", "c")).await;
        let pod = q.yield_pod(&token).await.unwrap();
        q.requeue(pod, "noFit").await;

        let snapshot = q.snapshot().await;
        assert_eq!(
            snapshot.iter().map(|(p, f)| (p.name.as_str(), *f)).collect::<Vec<_>>(),
            vec![("a", 1), ("b", 0), ("c", 0)],
        );

        let fresh = queuer();
        fresh.restore(snapshot).await;

        // "a" is gated by its restored failure count; "b" and "c" go first,
        // then "a" once the gate opens, same as in the original queue.
        assert_eq!(fresh.yield_pod(&token).await.unwrap().name, "b");
        assert_eq!(fresh.yield_pod(&token).await.unwrap().name, "c");
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(fresh.yield_pod(&token).await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn close_fails_yields() {
        let q = queuer();
        let token = CancellationToken::new();
        q.close().await;
        let err = q.yield_pod(&token).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueClosed));
    }

    #[tokio::test]
    async fn cancellation_unblocks_yield() {
        let q = queuer();
        let token = CancellationToken::new();
        let waiter = {
            let q = Arc::clone(&q);
            let token = token.clone();
            tokio::spawn(async move { q.yield_pod(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SchedulerError::Cancelled));
    }
}
