//! # PodTask: one pod bound to one cluster-manager task identity.
//!
//! A [`PodTask`] is created Pending when the binder picks an offer for a
//! pod, and then only ever advances:
//!
//! ```text
//! Pending ──bind──▶ Launched ──status(Running)──▶ Running
//!    │                   │                            │
//!    │                   └──status(terminal)──────────┤
//!    └──delete──▶ Deleted   status(terminal)──▶ Finished
//!                    Launched/Running ──delete──▶ kill ──▶ Deleted
//! ```
//!
//! Finished and Deleted are terminal; regressions are illegal and rejected
//! by the registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::driver::ExecutorId;
use crate::error::SchedulerError;
use crate::offers::OfferId;
use crate::pod::{Pod, PodId};

/// Process-local counter folded into generated task ids.
static TASK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Generated task identity, unique within the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a fresh id for a pod, readable in cluster-manager UIs.
    pub fn generate(pod: &PodId) -> Self {
        let n = TASK_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        Self(format!("{}_{}.{n:x}", pod.namespace, pod.name))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a pod task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Registered; no launch issued yet.
    Pending,
    /// Launch sent to the driver; waiting for the node to report.
    Launched,
    /// The node reported the task running.
    Running,
    /// The task reached a terminal status on its own.
    Finished,
    /// The task was retracted by a deletion.
    Deleted,
}

impl TaskState {
    /// Short stable label for logs and errors.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Launched => "launched",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Deleted => "deleted",
        }
    }

    /// True for states that never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Deleted)
    }

    /// True if the state machine permits moving to `next`.
    ///
    /// Re-asserting the current state is permitted (idempotent updates);
    /// anything backwards or out of a terminal state is not.
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            TaskState::Pending => matches!(
                next,
                TaskState::Launched | TaskState::Deleted
            ),
            TaskState::Launched => matches!(
                next,
                TaskState::Running | TaskState::Finished | TaskState::Deleted
            ),
            TaskState::Running => matches!(next, TaskState::Finished | TaskState::Deleted),
            TaskState::Finished | TaskState::Deleted => false,
        }
    }
}

/// Internal binding of a pod spec to a cluster-manager task.
#[derive(Clone, Debug)]
pub struct PodTask {
    /// Generated identity; the registry keys on this.
    pub id: TaskId,
    /// Snapshot of the pod this task realizes.
    pub pod: Pod,
    /// Executor stamped into the launch.
    pub executor: ExecutorId,
    /// Offer chosen for the current attempt; cleared when an attempt fails.
    pub offer_id: Option<OfferId>,
    /// Hostname of the node the current attempt targets.
    pub node: Option<String>,
    /// Lifecycle state; advanced only through the registry.
    pub state: TaskState,
    /// Set once a deletion asked the driver to kill this task; makes
    /// repeated deletes idempotent while the kill is in flight.
    pub kill_requested: bool,
    /// When the record was registered.
    pub created_at: SystemTime,
}

impl PodTask {
    /// Creates a Pending record for a pod; generates the task id.
    pub fn pending(pod: Pod, executor: ExecutorId) -> Self {
        let id = TaskId::generate(&pod.id());
        Self {
            id,
            pod,
            executor,
            offer_id: None,
            node: None,
            state: TaskState::Pending,
            kill_requested: false,
            created_at: SystemTime::now(),
        }
    }

    /// Identity of the pod this task realizes.
    pub fn pod_id(&self) -> PodId {
        self.pod.id()
    }

    /// Records the offer chosen for the current placement attempt.
    pub fn assign_offer(&mut self, offer_id: OfferId, node: impl Into<String>) {
        self.offer_id = Some(offer_id);
        self.node = Some(node.into());
    }

    /// Clears the placement of a failed attempt so the record can be reused.
    pub fn clear_offer(&mut self) {
        self.offer_id = None;
        self.node = None;
    }

    /// Checks and applies a state transition.
    pub fn advance(&mut self, next: TaskState) -> Result<(), SchedulerError> {
        if !self.state.can_advance_to(next) {
            return Err(SchedulerError::IllegalTransition {
                from: self.state.as_label(),
                to: next.as_label(),
            });
        }
        self.state = next;
        Ok(())
    }
}
