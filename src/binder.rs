//! # Binder: the single-threaded placement loop.
//!
//! One task, one loop: take the head pod from the queue, walk the offer
//! registry for the first fit, record the attempt in the task registry,
//! bind on the control plane, then launch on the driver. Offer consumption,
//! task registration, and the launch RPC all serialize through this loop;
//! the core never attempts two launches in parallel.
//!
//! ## Attempt flow
//! ```text
//! yield_pod(P)
//!   ├─► register task T (or reuse the Pending record from a prior attempt)
//!   ├─► walk offers ──► none fit ──► failedScheduling + requeue(P, noFit)
//!   ├─► bind(P, node) ──── fail ──► retire offer, clear T, requeue(P, bindFailed)
//!   ├─► launch_ack(O) ─── fail ──► offer was rescinded mid-bind, requeue(P)
//!   ├─► launch_tasks(O, T) ─ fail ► clear T, requeue(P, launchFailed)
//!   └─► advance T to Launched, clear backoff, emit `scheduled`
//! ```
//!
//! ## Rules
//! - A bind failure makes no launch call (observable atomicity).
//! - A launch failure does not undo the bind; the pod is requeued and the
//!   task record reverts to an unplaced Pending.
//! - A duplicate live task for the pod name drops the attempt with a
//!   warning event and no requeue.
//! - Driver and control-plane RPCs are bounded by the configured deadline;
//!   a timeout counts as failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, DriverStatus, ExecutorId, Filters, TaskInfo};
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::offers::{Offer, OfferRegistry, WalkAction};
use crate::pod::Pod;
use crate::queue::Queuer;
use crate::registry::{PodTask, TaskRegistry, TaskState};
use crate::source::PodSource;

/// The placement loop and the references it owns.
///
/// The binder owns references to both registries; the registries never call
/// back into it, they only expose queries.
pub struct Binder {
    queuer: Arc<Queuer>,
    offers: Arc<OfferRegistry>,
    tasks: Arc<TaskRegistry>,
    source: Arc<dyn PodSource>,
    driver: Arc<dyn Driver>,
    bus: Bus,
    executor: ExecutorId,
    deadline: Option<Duration>,
}

impl Binder {
    /// Wires a binder over the shared registries and surfaces.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queuer: Arc<Queuer>,
        offers: Arc<OfferRegistry>,
        tasks: Arc<TaskRegistry>,
        source: Arc<dyn PodSource>,
        driver: Arc<dyn Driver>,
        bus: Bus,
        executor: ExecutorId,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            queuer,
            offers,
            tasks,
            source,
            driver,
            bus,
            executor,
            deadline,
        }
    }

    /// Runs until the queue closes or the token fires.
    pub async fn run(self, token: CancellationToken) {
        loop {
            let pod = match self.queuer.yield_pod(&token).await {
                Ok(pod) => pod,
                // QueueClosed or Cancelled; either way the window is over.
                Err(_) => break,
            };
            self.schedule_one(pod).await;
        }
    }

    /// Attempts one placement; failures are absorbed into events + requeues.
    async fn schedule_one(&self, pod: Pod) {
        let pod_id = pod.id();

        // Find the record from a prior failed attempt, or register afresh.
        let task = match self.tasks.for_pod(&pod_id).await {
            Some(t) if t.state == TaskState::Pending && !t.kill_requested => t,
            Some(t) if !t.state.is_terminal() => {
                // Stale queue entry for a pod that is already launched.
                return;
            }
            _ => {
                let record = PodTask::pending(pod.clone(), self.executor.clone());
                match self.tasks.register(record).await {
                    Ok(t) => t,
                    Err(e @ SchedulerError::DuplicatePod { .. }) => {
                        self.bus.publish(
                            Event::now(EventKind::FailedScheduling)
                                .with_pod(&pod_id)
                                .with_error(e.to_string()),
                        );
                        return;
                    }
                    Err(_) => return,
                }
            }
        };

        let outcome = self
            .offers
            .walk(|offer| {
                if offer.fits(&pod) {
                    WalkAction::Consumed
                } else {
                    WalkAction::Continue
                }
            })
            .await;

        let offer = match outcome.consumed {
            Some(offer) => offer,
            None => {
                let err = SchedulerError::NoSuitableOffer { pod: pod_id.clone() };
                // Requeue before announcing, so the failure event observes
                // a settled queue.
                self.queuer.requeue(pod, "noFit").await;
                self.bus.publish(
                    Event::now(EventKind::FailedScheduling)
                        .with_pod(&pod_id)
                        .with_error(err.to_string()),
                );
                return;
            }
        };

        match self.bind_and_launch(&pod, task, &offer).await {
            Ok(task) => {
                self.queuer.clear_backoff(&pod_id).await;
                self.bus.publish(
                    Event::now(EventKind::Scheduled)
                        .with_pod(&pod_id)
                        .with_node(offer.hostname.clone())
                        .with_task_id(task.id.to_string()),
                );
            }
            Err((err, reason)) => {
                self.queuer.requeue(pod, reason).await;
                self.bus.publish(
                    Event::now(EventKind::FailedScheduling)
                        .with_pod(&pod_id)
                        .with_offer(offer.id.to_string())
                        .with_error(err.to_string()),
                );
            }
        }
    }

    /// Issues bind + launch for one consumed offer.
    ///
    /// On any failure the offer is retired, the task record reverts to an
    /// unplaced Pending, and the caller requeues the pod.
    async fn bind_and_launch(
        &self,
        pod: &Pod,
        mut task: PodTask,
        offer: &Offer,
    ) -> Result<PodTask, (SchedulerError, &'static str)> {
        let pod_id = pod.id();
        task.assign_offer(offer.id.clone(), offer.hostname.clone());
        if let Err(e) = self.tasks.update(&task).await {
            self.offers.delete(&offer.id).await;
            return Err((e, "bindFailed"));
        }

        let bind = self.bounded(self.source.bind(&pod_id, &offer.hostname), || {
            SchedulerError::BindFailed {
                reason: "bind deadline exceeded".into(),
            }
        });
        if let Err(e) = bind.await {
            self.offers.delete(&offer.id).await;
            self.revert(task).await;
            return Err((e, "bindFailed"));
        }

        // Finalize the claim; fails if the offer was rescinded mid-bind.
        if let Err(e) = self.offers.launch_ack(&offer.id).await {
            self.revert(task).await;
            return Err((e, "offerRescinded"));
        }

        let info = TaskInfo {
            task_id: task.id.clone(),
            pod: pod_id.clone(),
            node_id: offer.node_id.clone(),
            executor: self.executor.clone(),
            cpus: pod.request.cpus,
            mem: pod.request.mem,
            ports: pod.host_ports.clone(),
        };
        let offer_ids = [offer.id.clone()];
        let filters = Filters::default();
        let launch = self.bounded(
            self.driver
                .launch_tasks(&offer_ids, std::slice::from_ref(&info), &filters),
            || SchedulerError::LaunchFailed {
                reason: "launch deadline exceeded".into(),
            },
        );
        match launch.await {
            Ok(DriverStatus::Running) => {}
            Ok(status) => {
                self.revert(task).await;
                return Err((
                    SchedulerError::LaunchFailed {
                        reason: format!("driver status {}", status.as_label()),
                    },
                    "launchFailed",
                ));
            }
            Err(e) => {
                self.revert(task).await;
                return Err((e, "launchFailed"));
            }
        }

        match self.tasks.advance(&task.id, TaskState::Launched).await {
            Ok(t) => Ok(t),
            Err(e) => Err((e, "launchFailed")),
        }
    }

    /// Reverts a failed attempt: the record stays registered and Pending so
    /// the next attempt reuses it, but its placement is cleared.
    async fn revert(&self, mut task: PodTask) {
        task.clear_offer();
        let _ = self.tasks.update(&task).await;
    }

    /// Applies the configured RPC deadline to a driver/control-plane call.
    async fn bounded<T, F, E>(&self, fut: F, on_timeout: E) -> Result<T, SchedulerError>
    where
        F: Future<Output = Result<T, SchedulerError>>,
        E: FnOnce() -> SchedulerError,
    {
        match self.deadline {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(res) => res,
                Err(_) => Err(on_timeout()),
            },
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    use crate::driver::TaskStatus;
    use crate::offers::OfferId;
    use crate::pod::PodId;
    use crate::source::WatchEvent;

    #[derive(Default)]
    struct RecordingDriver {
        launches: StdMutex<Vec<(Vec<OfferId>, Vec<TaskInfo>)>>,
        fail_launch: StdMutex<bool>,
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        async fn start(&self) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Running)
        }
        async fn stop(&self, _failover: bool) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Stopped)
        }
        async fn abort(&self) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Aborted)
        }
        async fn join(&self) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Stopped)
        }
        async fn launch_tasks(
            &self,
            offer_ids: &[OfferId],
            tasks: &[TaskInfo],
            _filters: &Filters,
        ) -> Result<DriverStatus, SchedulerError> {
            if *self.fail_launch.lock().unwrap() {
                return Err(SchedulerError::LaunchFailed {
                    reason: "scripted failure".into(),
                });
            }
            self.launches
                .lock()
                .unwrap()
                .push((offer_ids.to_vec(), tasks.to_vec()));
            Ok(DriverStatus::Running)
        }
        async fn kill_task(&self, _task_id: &crate::registry::TaskId) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Running)
        }
        async fn decline_offer(
            &self,
            _offer_id: &OfferId,
            _filters: &Filters,
        ) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Running)
        }
        async fn reconcile_tasks(
            &self,
            _statuses: &[TaskStatus],
        ) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Running)
        }
    }

    #[derive(Default)]
    struct RecordingSource {
        binds: StdMutex<Vec<(PodId, String)>>,
        fail_bind: StdMutex<bool>,
    }

    #[async_trait]
    impl PodSource for RecordingSource {
        async fn list(&self) -> Result<(Vec<Pod>, u64), SchedulerError> {
            Ok((Vec::new(), 0))
        }
        async fn watch(
            &self,
            _resource_version: u64,
        ) -> Result<mpsc::Receiver<WatchEvent>, SchedulerError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn bind(&self, pod: &PodId, node: &str) -> Result<(), SchedulerError> {
            if *self.fail_bind.lock().unwrap() {
                return Err(SchedulerError::BindFailed {
                    reason: "scripted failure".into(),
                });
            }
            self.binds
                .lock()
                .unwrap()
                .push((pod.clone(), node.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        binder: Binder,
        queuer: Arc<Queuer>,
        offers: Arc<OfferRegistry>,
        tasks: Arc<TaskRegistry>,
        driver: Arc<RecordingDriver>,
        source: Arc<RecordingSource>,
        bus: Bus,
    }

    fn fixture() -> Fixture {
        let bus = Bus::new(256);
        let queuer = Queuer::new(bus.clone(), crate::policies::BackoffPolicy::default());
        let offers = OfferRegistry::new(bus.clone(), Duration::from_secs(10));
        let tasks = TaskRegistry::new();
        let driver = Arc::new(RecordingDriver::default());
        let source = Arc::new(RecordingSource::default());
        let binder = Binder::new(
            Arc::clone(&queuer),
            Arc::clone(&offers),
            Arc::clone(&tasks),
            source.clone(),
            driver.clone(),
            bus.clone(),
            ExecutorId("exec".into()),
            Some(Duration::from_secs(30)),
        );
        Fixture {
            binder,
            queuer,
            offers,
            tasks,
            driver,
            source,
            bus,
        }
    }

    fn offer(id: &str) -> Offer {
        Offer::new(id, "s1", "h1", 3.75, 940.0)
    }

    #[tokio::test]
    async fn fitting_offer_yields_bind_then_launch() {
        let f = fixture();
        f.offers.add(offer("o1")).await;
        let pod = Pod::new("default", "pod1").with_request(1.0, 64.0);

        f.binder.schedule_one(pod).await;

        let binds = f.source.binds.lock().unwrap().clone();
        assert_eq!(binds, vec![(PodId::new("default", "pod1"), "h1".to_string())]);
        let launches = f.driver.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, vec![OfferId::new("o1")]);
        assert_eq!(launches[0].1[0].pod, PodId::new("default", "pod1"));

        let task = f.tasks.for_pod(&PodId::new("default", "pod1")).await.unwrap();
        assert_eq!(task.state, TaskState::Launched);
        assert_eq!(task.node.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn no_fit_requeues_with_reason() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let pod = Pod::new("default", "pod1").with_request(64.0, 1_048_576.0);
        f.offers.add(offer("o1")).await;

        f.binder.schedule_one(pod).await;

        assert!(f.driver.launches.lock().unwrap().is_empty());
        assert!(f.queuer.contains(&PodId::new("default", "pod1")).await);
        loop {
            let ev = rx.recv().await.unwrap();
            if ev.kind == EventKind::FailedScheduling {
                assert!(ev.error.unwrap().contains("no suitable offer"));
                break;
            }
        }
        // The record is left Pending for the retry.
        let task = f.tasks.for_pod(&PodId::new("default", "pod1")).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn bind_failure_makes_no_launch_call() {
        let f = fixture();
        *f.source.fail_bind.lock().unwrap() = true;
        f.offers.add(offer("o1")).await;
        let pod = Pod::new("default", "pod1");

        f.binder.schedule_one(pod).await;

        assert!(f.driver.launches.lock().unwrap().is_empty());
        assert!(f.queuer.contains(&PodId::new("default", "pod1")).await);
        // The failed offer is retired, not reusable.
        assert_eq!(f.offers.live_count().await, 0);
        let task = f.tasks.for_pod(&PodId::new("default", "pod1")).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.offer_id.is_none());
    }

    #[tokio::test]
    async fn launch_failure_requeues_but_keeps_the_bind() {
        let f = fixture();
        *f.driver.fail_launch.lock().unwrap() = true;
        f.offers.add(offer("o1")).await;

        f.binder.schedule_one(Pod::new("default", "pod1")).await;

        // Bind happened, launch failed, pod is queued for another attempt.
        assert_eq!(f.source.binds.lock().unwrap().len(), 1);
        assert!(f.queuer.contains(&PodId::new("default", "pod1")).await);
        let task = f.tasks.for_pod(&PodId::new("default", "pod1")).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn retry_reuses_the_pending_record() {
        let f = fixture();
        let pod = Pod::new("default", "pod1");
        f.binder.schedule_one(pod.clone()).await;
        let first = f.tasks.for_pod(&pod.id()).await.unwrap();

        f.offers.add(offer("o1")).await;
        f.binder.schedule_one(pod.clone()).await;
        let second = f.tasks.for_pod(&pod.id()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.state, TaskState::Launched);
    }

    #[tokio::test]
    async fn stale_entry_for_launched_pod_is_dropped() {
        let f = fixture();
        f.offers.add(offer("o1")).await;
        let pod = Pod::new("default", "pod1");
        f.binder.schedule_one(pod.clone()).await;
        assert_eq!(f.driver.launches.lock().unwrap().len(), 1);

        // A second attempt for the same pod must not double-launch.
        f.offers.add(offer("o2")).await;
        f.binder.schedule_one(pod).await;
        assert_eq!(f.driver.launches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_fit_follows_offer_arrival_order() {
        let f = fixture();
        f.offers.add(Offer::new("small", "s1", "h1", 0.5, 32.0)).await;
        f.offers.add(offer("big1")).await;
        f.offers.add(offer("big2")).await;

        f.binder
            .schedule_one(Pod::new("default", "pod1").with_request(1.0, 64.0))
            .await;

        let launches = f.driver.launches.lock().unwrap();
        assert_eq!(launches[0].0, vec![OfferId::new("big1")]);
    }
}
