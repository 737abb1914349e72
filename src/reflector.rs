//! # Reflector: pumps watch events into the queue and the deleter.
//!
//! Owns the watch stream over the pod source and converts each observed
//! change into the right scheduling action:
//!
//! - `Added` → admission check + enqueue
//! - `Modified` → re-validation: a node assignment that matches our own
//!   task is the echo of our bind (no-op); anything else goes back through
//!   admission, and stale queue entries for foreign-bound pods are dropped
//! - `Deleted` → the deletion pipeline
//! - `Error` / stream end → watch restart with exponential backoff
//!
//! A periodic full relist heals events a dropped stream missed.
//!
//! ## Rules
//! - Events for a given pod are applied in watch order (one pump task).
//! - Restart backoff is capped by the configured policy (30s by default)
//!   and resets after a successful relist.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::deleter::Deleter;
use crate::events::{Bus, Event, EventKind};
use crate::pod::Pod;
use crate::policies::BackoffPolicy;
use crate::queue::Queuer;
use crate::registry::TaskRegistry;
use crate::source::{PodSource, WatchEvent};

/// Watch pump over one pod source.
pub struct Reflector {
    source: Arc<dyn PodSource>,
    queuer: Arc<Queuer>,
    deleter: Arc<Deleter>,
    tasks: Arc<TaskRegistry>,
    bus: Bus,
    watch_retry: BackoffPolicy,
    resync: Option<Duration>,
}

impl Reflector {
    /// Wires a reflector over the shared state.
    pub fn new(
        source: Arc<dyn PodSource>,
        queuer: Arc<Queuer>,
        deleter: Arc<Deleter>,
        tasks: Arc<TaskRegistry>,
        bus: Bus,
        watch_retry: BackoffPolicy,
        resync: Option<Duration>,
    ) -> Self {
        Self {
            source,
            queuer,
            deleter,
            tasks,
            bus,
            watch_retry,
            resync,
        }
    }

    /// Runs list-then-watch until the token fires.
    pub async fn run(self, token: CancellationToken) {
        let mut retry_delay: Option<Duration> = None;

        'relist: loop {
            if token.is_cancelled() {
                return;
            }

            let resource_version = match self.source.list().await {
                Ok((pods, rv)) => {
                    for pod in pods {
                        self.queuer.admit(pod).await;
                    }
                    retry_delay = None;
                    self.bus.publish(Event::now(EventKind::Resynced));
                    rv
                }
                Err(e) => {
                    retry_delay = Some(self.watch_retry.next(retry_delay));
                    if !self.restart_pause(&token, retry_delay.unwrap(), &e.to_string()).await {
                        return;
                    }
                    continue 'relist;
                }
            };

            let mut rx = match self.source.watch(resource_version).await {
                Ok(rx) => rx,
                Err(e) => {
                    retry_delay = Some(self.watch_retry.next(retry_delay));
                    if !self.restart_pause(&token, retry_delay.unwrap(), &e.to_string()).await {
                        return;
                    }
                    continue 'relist;
                }
            };

            // A disabled resync still needs a real deadline for the select
            // arm; a year is past any process lifetime and within the
            // runtime's timer horizon.
            let resync = tokio::time::sleep(
                self.resync.unwrap_or(Duration::from_secs(365 * 24 * 3600)),
            );
            tokio::pin!(resync);

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = &mut resync, if self.resync.is_some() => continue 'relist,
                    ev = rx.recv() => match ev {
                        Some(WatchEvent::Added(pod)) => {
                            self.queuer.admit(pod).await;
                        }
                        Some(WatchEvent::Modified(pod)) => self.handle_modified(pod).await,
                        Some(WatchEvent::Deleted(pod)) => {
                            // NoSuchPod here just means we never queued it.
                            let _ = self.deleter.delete_one(&pod).await;
                        }
                        Some(WatchEvent::Error(msg)) => {
                            retry_delay = Some(self.watch_retry.next(retry_delay));
                            if !self.restart_pause(&token, retry_delay.unwrap(), &msg).await {
                                return;
                            }
                            continue 'relist;
                        }
                        None => {
                            retry_delay = Some(self.watch_retry.next(retry_delay));
                            if !self.restart_pause(&token, retry_delay.unwrap(), "stream closed").await {
                                return;
                            }
                            continue 'relist;
                        }
                    }
                }
            }
        }
    }

    /// Re-validates a modified pod.
    async fn handle_modified(&self, pod: Pod) {
        let Some(pod_id) = pod.qualified_id() else {
            return;
        };
        if pod.is_assigned() {
            if let Some(task) = self.tasks.for_pod(&pod_id).await {
                if !task.state.is_terminal() && task.node.as_deref() == pod.assigned_node.as_deref()
                {
                    // The echo of our own bind; nothing to do.
                    return;
                }
            }
            // Bound by someone else or stale; make sure we stop trying.
            self.queuer.dequeue(&pod_id).await;
        } else {
            self.queuer.admit(pod).await;
        }
    }

    /// Publishes the restart event and sleeps the backoff delay.
    /// Returns false when cancelled mid-sleep.
    async fn restart_pause(&self, token: &CancellationToken, delay: Duration, cause: &str) -> bool {
        self.bus.publish(
            Event::now(EventKind::WatchRestarted)
                .with_delay(delay)
                .with_error(cause.to_string()),
        );
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
