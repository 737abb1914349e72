//! # Driver surface: the cluster-manager side of the scheduler.
//!
//! [`Driver`] is the outgoing half of the contract: the client object
//! through which the core launches and kills tasks and manages its own
//! registration lifecycle. The incoming half (offers, status updates,
//! disconnects) arrives as calls on the
//! [`Scheduler`](crate::scheduler::Scheduler) facade.
//!
//! The driver is injected at election time by a
//! [`DriverFactory`](crate::ha::DriverFactory); tests inject mocks. The core
//! never constructs a concrete driver itself.
//!
//! ## Rules
//! - [`Driver::start`] from any status other than `NotStarted` fails.
//! - Every RPC reports the driver status; callers treat a non-`Running`
//!   status as a failed call.
//! - Callbacks into the scheduler must never panic; driver-level failures
//!   surface as [`SchedulerError::Driver`](crate::SchedulerError) and abort
//!   the HA process.

use std::fmt;

use async_trait::async_trait;

use crate::error::SchedulerError;
use crate::offers::OfferId;
use crate::pod::PodId;
use crate::registry::TaskId;

/// Lifecycle status reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverStatus {
    /// Constructed but not started.
    NotStarted,
    /// Connected and processing.
    Running,
    /// Stopped gracefully (possibly with failover enabled).
    Stopped,
    /// Aborted; the driver is unusable and the process should exit non-zero.
    Aborted,
}

impl DriverStatus {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DriverStatus::NotStarted => "driver_not_started",
            DriverStatus::Running => "driver_running",
            DriverStatus::Stopped => "driver_stopped",
            DriverStatus::Aborted => "driver_aborted",
        }
    }
}

/// Task state codes reported by the cluster manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStateCode {
    /// Task accepted, resources not yet allocated on the node.
    Staging,
    /// Executor is bringing the task up.
    Starting,
    /// Task is running.
    Running,
    /// Task finished successfully.
    Finished,
    /// Task failed on the node.
    Failed,
    /// Task was killed on request.
    Killed,
    /// Task was lost (node removed, executor died, ...).
    Lost,
    /// Unrecoverable task error.
    Error,
}

impl TaskStateCode {
    /// True for codes after which no further updates arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStateCode::Finished
                | TaskStateCode::Failed
                | TaskStateCode::Killed
                | TaskStateCode::Lost
                | TaskStateCode::Error
        )
    }

    /// Short stable label for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStateCode::Staging => "TASK_STAGING",
            TaskStateCode::Starting => "TASK_STARTING",
            TaskStateCode::Running => "TASK_RUNNING",
            TaskStateCode::Finished => "TASK_FINISHED",
            TaskStateCode::Failed => "TASK_FAILED",
            TaskStateCode::Killed => "TASK_KILLED",
            TaskStateCode::Lost => "TASK_LOST",
            TaskStateCode::Error => "TASK_ERROR",
        }
    }
}

impl fmt::Display for TaskStateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Status update delivered by the driver for one task.
#[derive(Clone, Debug)]
pub struct TaskStatus {
    /// The task this update concerns.
    pub task_id: TaskId,
    /// Reported state code.
    pub state: TaskStateCode,
    /// Optional free-form message from the executor or master.
    pub message: Option<String>,
}

impl TaskStatus {
    /// Creates a status update without a message.
    pub fn new(task_id: TaskId, state: TaskStateCode) -> Self {
        Self {
            task_id,
            state,
            message: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Executor identity stamped into every launched task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorId(pub String);

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the driver needs to launch one task against one offer.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    /// Generated task identity.
    pub task_id: TaskId,
    /// Pod this task realizes.
    pub pod: PodId,
    /// Node (slave) the offer belongs to.
    pub node_id: String,
    /// Executor that will run the task on the node.
    pub executor: ExecutorId,
    /// CPU shares to allocate.
    pub cpus: f64,
    /// Memory (MB) to allocate.
    pub mem: f64,
    /// Host ports to reserve out of the offer's ranges.
    pub ports: Vec<u16>,
}

/// Decline/launch filters passed to the cluster manager.
#[derive(Clone, Copy, Debug)]
pub struct Filters {
    /// How long the master may withhold re-offering declined resources.
    pub refuse_seconds: f64,
}

impl Default for Filters {
    fn default() -> Self {
        Self { refuse_seconds: 5.0 }
    }
}

/// Outgoing cluster-manager contract.
///
/// All methods return the driver status; implementations translate their
/// transport failures into [`SchedulerError::Driver`].
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Starts the driver. Fails unless the status is `NotStarted`.
    async fn start(&self) -> Result<DriverStatus, SchedulerError>;

    /// Stops the driver. With `failover` the framework stays registered so a
    /// successor can take over the running tasks.
    async fn stop(&self, failover: bool) -> Result<DriverStatus, SchedulerError>;

    /// Aborts the driver; no further callbacks will be delivered.
    async fn abort(&self) -> Result<DriverStatus, SchedulerError>;

    /// Blocks until the driver reaches `Stopped` or `Aborted`.
    async fn join(&self) -> Result<DriverStatus, SchedulerError>;

    /// Launches tasks against consumed offers.
    async fn launch_tasks(
        &self,
        offer_ids: &[OfferId],
        tasks: &[TaskInfo],
        filters: &Filters,
    ) -> Result<DriverStatus, SchedulerError>;

    /// Requests a kill for one task; the result arrives as a status update.
    async fn kill_task(&self, task_id: &TaskId) -> Result<DriverStatus, SchedulerError>;

    /// Declines an offer back to the master.
    async fn decline_offer(
        &self,
        offer_id: &OfferId,
        filters: &Filters,
    ) -> Result<DriverStatus, SchedulerError>;

    /// Asks the master to re-send authoritative status for the given tasks.
    async fn reconcile_tasks(
        &self,
        statuses: &[TaskStatus],
    ) -> Result<DriverStatus, SchedulerError>;
}
