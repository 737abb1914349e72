//! # Deleter: retract a pod at any lifecycle stage.
//!
//! [`Deleter::delete_one`] is the single entry point for pod deletion. What
//! it does depends on where the pod is found:
//!
//! | Discovered state | Action |
//! |---|---|
//! | nowhere | `NoSuchPod` |
//! | queued, never registered | dequeue, done |
//! | Pending record | unregister + dequeue, done |
//! | Launched or Running | dequeue, mark kill, `kill_task`; record stays until the terminal status arrives |
//! | terminal, or kill already requested | idempotent success |
//!
//! Deletes are idempotent: repeating one makes at most one `kill_task`
//! call. Only a pod the scheduler has never seen keeps failing with
//! `NoSuchPod`.

use std::sync::Arc;

use crate::driver::Driver;
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::pod::Pod;
use crate::queue::Queuer;
use crate::registry::{TaskRegistry, TaskState};

/// Deletion pipeline over the queue, the task registry, and the driver.
pub struct Deleter {
    queuer: Arc<Queuer>,
    tasks: Arc<TaskRegistry>,
    driver: Arc<dyn Driver>,
    bus: Bus,
}

impl Deleter {
    /// Wires a deleter over the shared state.
    pub fn new(
        queuer: Arc<Queuer>,
        tasks: Arc<TaskRegistry>,
        driver: Arc<dyn Driver>,
        bus: Bus,
    ) -> Self {
        Self {
            queuer,
            tasks,
            driver,
            bus,
        }
    }

    /// Deletes one pod, wherever it is in its lifecycle.
    pub async fn delete_one(&self, pod: &Pod) -> Result<(), SchedulerError> {
        let pod_id = pod.qualified_id().ok_or(SchedulerError::BadPodNaming)?;

        let dequeued = self.queuer.dequeue(&pod_id).await;

        let task = match self.tasks.for_pod(&pod_id).await {
            Some(task) => task,
            None => {
                return if dequeued {
                    Ok(())
                } else {
                    Err(SchedulerError::NoSuchPod { pod: pod_id })
                };
            }
        };

        match task.state {
            TaskState::Pending => {
                self.tasks.unregister(&task.id).await;
                Ok(())
            }
            TaskState::Launched | TaskState::Running => {
                if task.kill_requested {
                    // Kill already in flight; nothing more to do.
                    return Ok(());
                }
                self.tasks.mark_kill_requested(&task.id).await;
                self.bus.publish(
                    Event::now(EventKind::Killing)
                        .with_pod(&pod_id)
                        .with_task_id(task.id.to_string()),
                );
                // The record stays registered until the terminal status
                // update arrives and moves it to Deleted.
                self.driver.kill_task(&task.id).await?;
                Ok(())
            }
            TaskState::Finished | TaskState::Deleted => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::driver::{DriverStatus, ExecutorId, Filters, TaskInfo, TaskStatus};
    use crate::offers::OfferId;
    use crate::pod::PodId;
    use crate::policies::BackoffPolicy;
    use crate::registry::{PodTask, TaskId};

    #[derive(Default)]
    struct KillRecorder {
        kills: StdMutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl Driver for KillRecorder {
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
            _offer_ids: &[OfferId],
            _tasks: &[TaskInfo],
            _filters: &Filters,
        ) -> Result<DriverStatus, SchedulerError> {
            Ok(DriverStatus::Running)
        }
        async fn kill_task(&self, task_id: &TaskId) -> Result<DriverStatus, SchedulerError> {
            self.kills.lock().unwrap().push(task_id.clone());
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

    struct Fixture {
        deleter: Deleter,
        queuer: Arc<Queuer>,
        tasks: Arc<TaskRegistry>,
        driver: Arc<KillRecorder>,
    }

    fn fixture() -> Fixture {
        let bus = Bus::new(64);
        let queuer = Queuer::new(bus.clone(), BackoffPolicy::default());
        let tasks = TaskRegistry::new();
        let driver = Arc::new(KillRecorder::default());
        let deleter = Deleter::new(
            Arc::clone(&queuer),
            Arc::clone(&tasks),
            driver.clone(),
            bus,
        );
        Fixture {
            deleter,
            queuer,
            tasks,
            driver,
        }
    }

    fn pod(name: &str) -> Pod {
        Pod::new("default", name)
    }

    #[tokio::test]
    async fn unknown_pod_fails_no_such_pod() {
        let f = fixture();
        let err = f.deleter.delete_one(&pod("foo")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchPod { .. }));
        assert!(f.driver.kills.lock().unwrap().is_empty());

        // Never-known pods keep failing; there is no state to make the
        // repeat idempotent.
        let err = f.deleter.delete_one(&pod("foo")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchPod { .. }));
    }

    #[tokio::test]
    async fn bad_naming_is_rejected_before_lookup() {
        let f = fixture();
        let err = f.deleter.delete_one(&Pod::new("bar", "")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::BadPodNaming));
        let err = f.deleter.delete_one(&Pod::new("", "foo")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::BadPodNaming));
    }

    #[tokio::test]
    async fn queued_only_pod_is_dequeued() {
        let f = fixture();
        f.queuer.admit(pod("foo")).await;
        assert_eq!(f.queuer.len().await, 1);

        f.deleter.delete_one(&pod("foo")).await.unwrap();
        assert!(f.queuer.is_empty().await);
        assert!(f.driver.kills.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_pod_is_unregistered_and_dequeued() {
        let f = fixture();
        f.queuer.admit(pod("foo")).await;
        f.tasks
            .register(PodTask::pending(pod("foo"), ExecutorId("exec".into())))
            .await
            .unwrap();

        f.deleter.delete_one(&pod("foo")).await.unwrap();
        assert!(f.queuer.is_empty().await);
        assert!(f.tasks.for_pod(&PodId::new("default", "foo")).await.is_none());
        assert!(f.driver.kills.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn launched_pod_gets_exactly_one_kill() {
        let f = fixture();
        f.queuer.admit(pod("foo")).await;
        let task = f
            .tasks
            .register(PodTask::pending(pod("foo"), ExecutorId("exec".into())))
            .await
            .unwrap();
        f.tasks.advance(&task.id, TaskState::Launched).await.unwrap();

        f.deleter.delete_one(&pod("foo")).await.unwrap();
        f.deleter.delete_one(&pod("foo")).await.unwrap();

        assert_eq!(f.driver.kills.lock().unwrap().as_slice(), &[task.id.clone()]);
        assert!(f.queuer.is_empty().await);
        // Not Deleted yet; that happens when the terminal status arrives.
        let current = f.tasks.get(&task.id).await.unwrap();
        assert_eq!(current.state, TaskState::Launched);
        assert!(current.kill_requested);
    }

    #[tokio::test]
    async fn terminal_task_deletes_idempotently() {
        let f = fixture();
        let task = f
            .tasks
            .register(PodTask::pending(pod("foo"), ExecutorId("exec".into())))
            .await
            .unwrap();
        f.tasks.advance(&task.id, TaskState::Launched).await.unwrap();
        f.tasks.advance(&task.id, TaskState::Finished).await.unwrap();

        f.deleter.delete_one(&pod("foo")).await.unwrap();
        assert!(f.driver.kills.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_unblocks_nothing_else() {
        // Deleting one pod leaves other queue entries untouched.
        let f = fixture();
        f.queuer.admit(pod("keep")).await;
        f.queuer.admit(pod("drop")).await;
        f.deleter.delete_one(&pod("drop")).await.unwrap();
        assert_eq!(f.queuer.len().await, 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(f.queuer.contains(&PodId::new("default", "keep")).await);
    }
}
