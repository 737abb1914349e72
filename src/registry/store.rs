//! # Task registry: the authoritative pod→task map.
//!
//! All reads and writes go through one lock; the registry is the single
//! source of truth for task records. It never calls back into the binder or
//! the queue; it only answers queries and enforces the state machine.
//!
//! ## Rules
//! - [`register`](TaskRegistry::register) requires a Pending record and
//!   fails with `DuplicatePod` while a non-terminal task exists for the pod.
//! - [`update`](TaskRegistry::update) and
//!   [`advance`](TaskRegistry::advance) are state-machine checked; illegal
//!   transitions fail with `IllegalTransition` and change nothing.
//! - The pod index tracks the *latest* task per pod; a terminal task is
//!   superseded by the next registration for the same pod name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::SchedulerError;
use crate::pod::PodId;
use crate::registry::{PodTask, TaskId, TaskState};

struct Inner {
    tasks: HashMap<TaskId, PodTask>,
    by_pod: HashMap<PodId, TaskId>,
}

/// In-memory authoritative registry of pod tasks.
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                by_pod: HashMap::new(),
            }),
        })
    }

    /// Registers a Pending task record.
    ///
    /// Fails with [`SchedulerError::DuplicatePod`] when a non-terminal task
    /// already exists for the pod name, and with
    /// [`SchedulerError::IllegalTransition`] when the record is not Pending.
    pub async fn register(&self, task: PodTask) -> Result<PodTask, SchedulerError> {
        if task.state != TaskState::Pending {
            return Err(SchedulerError::IllegalTransition {
                from: task.state.as_label(),
                to: TaskState::Pending.as_label(),
            });
        }
        let pod_id = task.pod_id();
        let mut inner = self.inner.write().await;
        if let Some(existing_id) = inner.by_pod.get(&pod_id) {
            if let Some(existing) = inner.tasks.get(existing_id) {
                if !existing.state.is_terminal() {
                    return Err(SchedulerError::DuplicatePod { pod: pod_id });
                }
            }
        }
        inner.by_pod.insert(pod_id, task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Returns a snapshot of the record, if known.
    pub async fn get(&self, id: &TaskId) -> Option<PodTask> {
        let inner = self.inner.read().await;
        inner.tasks.get(id).cloned()
    }

    /// Returns the latest task recorded for a pod name, if any.
    pub async fn for_pod(&self, pod: &PodId) -> Option<PodTask> {
        let inner = self.inner.read().await;
        let id = inner.by_pod.get(pod)?;
        inner.tasks.get(id).cloned()
    }

    /// Replaces a record wholesale after checking the state transition
    /// against the stored state.
    pub async fn update(&self, task: &PodTask) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        let current = inner.tasks.get(&task.id).ok_or(SchedulerError::NoSuchPod {
            pod: task.pod_id(),
        })?;
        if !current.state.can_advance_to(task.state) {
            return Err(SchedulerError::IllegalTransition {
                from: current.state.as_label(),
                to: task.state.as_label(),
            });
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    /// Advances the record's state in place and returns the new snapshot.
    pub async fn advance(
        &self,
        id: &TaskId,
        next: TaskState,
    ) -> Result<PodTask, SchedulerError> {
        let mut inner = self.inner.write().await;
        let task = match inner.tasks.get_mut(id) {
            Some(t) => t,
            None => {
                return Err(SchedulerError::IllegalTransition {
                    from: "unknown",
                    to: next.as_label(),
                })
            }
        };
        task.advance(next)?;
        Ok(task.clone())
    }

    /// Marks the kill flag on a record; returns the updated snapshot.
    ///
    /// The flag is what makes repeated deletes idempotent while the kill
    /// status is still in flight.
    pub async fn mark_kill_requested(&self, id: &TaskId) -> Option<PodTask> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(id)?;
        task.kill_requested = true;
        Some(task.clone())
    }

    /// Removes a record entirely (pending deletes and failed registrations).
    pub async fn unregister(&self, id: &TaskId) -> Option<PodTask> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.remove(id)?;
        let pod_id = task.pod_id();
        if inner.by_pod.get(&pod_id) == Some(id) {
            inner.by_pod.remove(&pod_id);
        }
        Some(task)
    }

    /// Snapshots every record matching the filter.
    pub async fn list<F>(&self, filter: F) -> Vec<PodTask>
    where
        F: Fn(&PodTask) -> bool,
    {
        let inner = self.inner.read().await;
        inner.tasks.values().filter(|t| filter(t)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ExecutorId;
    use crate::pod::Pod;

    fn pending(name: &str) -> PodTask {
        PodTask::pending(Pod::new("default", name), ExecutorId("exec".into()))
    }

    #[tokio::test]
    async fn register_then_lookup_both_ways() {
        let reg = TaskRegistry::new();
        let task = reg.register(pending("web")).await.unwrap();
        assert_eq!(reg.get(&task.id).await.unwrap().id, task.id);
        let by_pod = reg.for_pod(&PodId::new("default", "web")).await.unwrap();
        assert_eq!(by_pod.id, task.id);
    }

    #[tokio::test]
    async fn duplicate_live_pod_is_rejected() {
        let reg = TaskRegistry::new();
        reg.register(pending("web")).await.unwrap();
        let err = reg.register(pending("web")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicatePod { .. }));
    }

    #[tokio::test]
    async fn terminal_task_frees_the_pod_name() {
        let reg = TaskRegistry::new();
        let t = reg.register(pending("web")).await.unwrap();
        reg.advance(&t.id, TaskState::Launched).await.unwrap();
        reg.advance(&t.id, TaskState::Finished).await.unwrap();

        let replacement = reg.register(pending("web")).await.unwrap();
        assert_ne!(replacement.id, t.id);
        let current = reg.for_pod(&PodId::new("default", "web")).await.unwrap();
        assert_eq!(current.id, replacement.id);
    }

    #[tokio::test]
    async fn advance_rejects_regressions() {
        let reg = TaskRegistry::new();
        let t = reg.register(pending("web")).await.unwrap();
        reg.advance(&t.id, TaskState::Launched).await.unwrap();
        reg.advance(&t.id, TaskState::Running).await.unwrap();

        let err = reg.advance(&t.id, TaskState::Launched).await.unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalTransition { .. }));
        assert_eq!(reg.get(&t.id).await.unwrap().state, TaskState::Running);
    }

    #[tokio::test]
    async fn unregister_clears_both_indexes() {
        let reg = TaskRegistry::new();
        let t = reg.register(pending("web")).await.unwrap();
        assert!(reg.unregister(&t.id).await.is_some());
        assert!(reg.get(&t.id).await.is_none());
        assert!(reg.for_pod(&PodId::new("default", "web")).await.is_none());
    }

    #[tokio::test]
    async fn register_requires_pending_state() {
        let reg = TaskRegistry::new();
        let mut t = pending("web");
        t.state = TaskState::Launched;
        assert!(reg.register(t).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_snapshots() {
        let reg = TaskRegistry::new();
        let a = reg.register(pending("a")).await.unwrap();
        reg.register(pending("b")).await.unwrap();
        reg.advance(&a.id, TaskState::Launched).await.unwrap();

        let launched = reg.list(|t| t.state == TaskState::Launched).await;
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].id, a.id);
    }
}
