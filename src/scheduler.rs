//! # Scheduler facade: construction site and driver callback surface.
//!
//! The [`Scheduler`] owns the shared state (offer registry, task registry,
//! queue, event bus) and is the single place everything is constructed and
//! wired; there are no ambient globals. It has two faces:
//!
//! - **Callbacks** (`registered`, `resource_offers`, `offer_rescinded`,
//!   `status_update`, `disconnected`, `error`): the driver adapter calls
//!   these to translate cluster-manager callbacks into offer/status
//!   bookkeeping. Callbacks arriving after Terminal are dropped.
//! - **[`run`](Scheduler::run)**: waits for the master window, then spawns
//!   the binder, reflector, offer sweeper, and queue-closer under the
//!   process's terminal token.
//!
//! ## Wiring
//! ```text
//! Scheduler::run(process)
//!   ├─ process.master() ──► driver
//!   ├─ reconcile launched/running tasks with the driver
//!   ├─ spawn Reflector (pod source → queue/deleter)
//!   ├─ spawn Binder    (queue → offers → bind+launch)
//!   ├─ spawn sweeper   (offer TTL → decline)
//!   └─ spawn closer    (terminal → queue close)
//! ```

use std::sync::{Arc, OnceLock, Weak};

use tokio_util::sync::CancellationToken;

use crate::binder::Binder;
use crate::config::Config;
use crate::deleter::Deleter;
use crate::driver::{Driver, ExecutorId, TaskStateCode, TaskStatus};
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::ha::SchedulerProcess;
use crate::offers::{Offer, OfferId, OfferRegistry};
use crate::queue::Queuer;
use crate::reflector::Reflector;
use crate::registry::{TaskRegistry, TaskState};
use crate::source::PodSource;
use crate::subscribers::{Subscribe, SubscriberSet};

/// The scheduling core, fully wired.
pub struct Scheduler {
    cfg: Config,
    executor: ExecutorId,
    bus: Bus,
    offers: Arc<OfferRegistry>,
    tasks: Arc<TaskRegistry>,
    queuer: Arc<Queuer>,
    source: Arc<dyn PodSource>,
    /// Keeps subscriber workers alive for the scheduler's lifetime.
    _subs: Arc<SubscriberSet>,
    driver: OnceLock<Arc<dyn Driver>>,
    deleter: OnceLock<Arc<Deleter>>,
    terminal: OnceLock<CancellationToken>,
    process: OnceLock<Weak<SchedulerProcess>>,
}

impl Scheduler {
    /// Constructs the core and its shared state.
    pub fn new(
        cfg: Config,
        executor: ExecutorId,
        source: Arc<dyn PodSource>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(subscribers, bus.clone());
        let offers = OfferRegistry::new(bus.clone(), cfg.offer_expiry());
        let tasks = TaskRegistry::new();
        let queuer = Queuer::new(bus.clone(), cfg.pod_backoff);

        Arc::new(Self {
            cfg,
            executor,
            bus,
            offers,
            tasks,
            queuer,
            source,
            _subs: subs,
            driver: OnceLock::new(),
            deleter: OnceLock::new(),
            terminal: OnceLock::new(),
            process: OnceLock::new(),
        })
    }

    /// The event bus; subscribe here for assertions and monitoring.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// The offer registry.
    pub fn offers(&self) -> Arc<OfferRegistry> {
        Arc::clone(&self.offers)
    }

    /// The task registry.
    pub fn tasks(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.tasks)
    }

    /// The pod queue.
    pub fn queuer(&self) -> Arc<Queuer> {
        Arc::clone(&self.queuer)
    }

    /// The deletion pipeline; available once [`run`](Self::run) has wired it.
    pub fn deleter(&self) -> Option<Arc<Deleter>> {
        self.deleter.get().cloned()
    }

    /// Waits for the master window, then starts every scheduling component
    /// under the process's terminal token.
    pub async fn run(
        self: &Arc<Self>,
        process: &Arc<SchedulerProcess>,
    ) -> Result<(), SchedulerError> {
        let driver = process.master().await?;
        let token = process.terminal();
        let _ = self.driver.set(Arc::clone(&driver));
        let _ = self.terminal.set(token.clone());
        let _ = self.process.set(Arc::downgrade(process));

        self.reconcile_existing(&driver).await;

        let deleter = Arc::new(Deleter::new(
            Arc::clone(&self.queuer),
            Arc::clone(&self.tasks),
            Arc::clone(&driver),
            self.bus.clone(),
        ));
        let _ = self.deleter.set(Arc::clone(&deleter));

        let reflector = Reflector::new(
            Arc::clone(&self.source),
            Arc::clone(&self.queuer),
            deleter,
            Arc::clone(&self.tasks),
            self.bus.clone(),
            self.cfg.watch_retry,
            self.cfg.resync_interval(),
        );
        tokio::spawn(reflector.run(token.clone()));

        let binder = Binder::new(
            Arc::clone(&self.queuer),
            Arc::clone(&self.offers),
            Arc::clone(&self.tasks),
            Arc::clone(&self.source),
            Arc::clone(&driver),
            self.bus.clone(),
            self.executor.clone(),
            self.cfg.driver_deadline(),
        );
        tokio::spawn(binder.run(token.clone()));

        tokio::spawn(Arc::clone(&self.offers).run_sweeper(
            Arc::clone(&driver),
            self.cfg.sweep_interval,
            token.clone(),
        ));

        // Closing Terminal fails every pending and future yield.
        let queuer = Arc::clone(&self.queuer);
        tokio::spawn(async move {
            token.cancelled().await;
            queuer.close().await;
        });

        Ok(())
    }

    // ── Driver callbacks ────────────────────────────────────────────

    /// Driver (re-)registered with the cluster manager; ask it for
    /// authoritative status on everything we think is running.
    pub async fn registered(&self, _framework_id: &str) {
        if let Some(driver) = self.driver.get() {
            self.reconcile_existing(driver).await;
        }
    }

    /// New offers from the cluster manager.
    ///
    /// Offer arrival also releases pod backoff gates: a stalled pod's next
    /// attempt should race the fresh offers, not its timer.
    pub async fn resource_offers(&self, offers: Vec<Offer>) {
        if self.is_terminated() {
            return;
        }
        for offer in offers {
            self.offers.add(offer).await;
        }
        self.queuer.offers_available().await;
    }

    /// The cluster manager took an offer back.
    pub async fn offer_rescinded(&self, id: &OfferId) {
        if self.is_terminated() {
            return;
        }
        self.offers.rescind(id).await;
    }

    /// Authoritative task status from the cluster manager.
    pub async fn status_update(&self, status: TaskStatus) {
        if self.is_terminated() {
            return;
        }

        let Some(task) = self.tasks.get(&status.task_id).await else {
            // A task we know nothing about. Kill live strangers (implicit
            // reconciliation); terminal strangers need nothing.
            if !status.state.is_terminal() {
                if let Some(driver) = self.driver.get() {
                    let _ = driver.kill_task(&status.task_id).await;
                }
            }
            return;
        };

        match status.state {
            TaskStateCode::Staging | TaskStateCode::Starting => {}
            TaskStateCode::Running => {
                if let Err(e) = self.tasks.advance(&task.id, TaskState::Running).await {
                    self.publish_illegal(&task.pod_id().to_string(), &status, &e);
                }
            }
            code => {
                let next = if task.kill_requested {
                    TaskState::Deleted
                } else {
                    TaskState::Finished
                };
                if task.state == next {
                    // Duplicate terminal update; already settled.
                    return;
                }
                match self.tasks.advance(&task.id, next).await {
                    Ok(_) => self.publish_terminal(&task, code, &status),
                    Err(e) => self.publish_illegal(&task.pod_id().to_string(), &status, &e),
                }
            }
        }
    }

    /// The driver lost its connection; offers do not survive a failover.
    pub async fn disconnected(&self) {
        self.bus.publish(Event::now(EventKind::Disconnected));
        self.offers.clear().await;
    }

    /// Fatal driver error: abort the HA process.
    pub async fn error(&self, message: &str) {
        if let Some(process) = self.process.get().and_then(Weak::upgrade) {
            process.fail(message).await;
        } else {
            self.bus.publish(
                Event::now(EventKind::LeadershipLost).with_error(message.to_string()),
            );
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn is_terminated(&self) -> bool {
        self.terminal.get().is_some_and(CancellationToken::is_cancelled)
    }

    /// Asks the driver for fresh status on every task we believe is live.
    async fn reconcile_existing(&self, driver: &Arc<dyn Driver>) {
        let live = self
            .tasks
            .list(|t| matches!(t.state, TaskState::Launched | TaskState::Running))
            .await;
        if live.is_empty() {
            return;
        }
        let statuses: Vec<TaskStatus> = live
            .into_iter()
            .map(|t| {
                let code = match t.state {
                    TaskState::Running => TaskStateCode::Running,
                    _ => TaskStateCode::Staging,
                };
                TaskStatus::new(t.id, code)
            })
            .collect();
        let _ = driver.reconcile_tasks(&statuses).await;
    }

    fn publish_terminal(&self, task: &crate::registry::PodTask, code: TaskStateCode, status: &TaskStatus) {
        let pod = task.pod_id().to_string();
        let message = status.message.clone().unwrap_or_default();
        if task.kill_requested {
            self.bus.publish(
                Event::now(EventKind::Killed)
                    .with_pod(pod)
                    .with_task_id(task.id.to_string()),
            );
            return;
        }
        match code {
            TaskStateCode::Finished => {}
            _ => {
                self.bus.publish(
                    Event::now(EventKind::Lost)
                        .with_pod(pod)
                        .with_task_id(task.id.to_string())
                        .with_error(format!("{code}: {message}")),
                );
            }
        }
    }

    fn publish_illegal(&self, pod: &str, status: &TaskStatus, err: &SchedulerError) {
        self.bus.publish(
            Event::now(EventKind::IllegalStatus)
                .with_pod(pod)
                .with_task_id(status.task_id.to_string())
                .with_error(err.to_string()),
        );
    }
}
