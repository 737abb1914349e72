//! # podvisor
//!
//! **Podvisor** is a pod-scheduling core. It bridges a container
//! control plane (a watchable pod API) with a two-level resource-offer
//! cluster manager: pods come in through a watch, offers come in through
//! driver callbacks, and on every relevant event the core decides whether
//! to bind a pending pod to an offered node and launch it there as a
//! task, keeping the bookkeeping consistent through offer expiry,
//! rescission, pod deletion, leadership change, and partial failures.
//!
//! ## Features
//!
//! | Area | Description | Key types / traits |
//! |------|-------------|--------------------|
//! | **Offers** | Live-offer registry: insertion-order walk, fitness matching, TTL sweeper. | [`Offer`], [`OfferRegistry`] |
//! | **Tasks** | Pod→task records with a monotone state machine. | [`PodTask`], [`TaskRegistry`] |
//! | **Queue** | FCFS pod queue with per-pod backoff. | [`Queuer`] |
//! | **Placement** | Single-threaded bind+launch loop. | [`Binder`] |
//! | **Deletion** | Idempotent retraction at any lifecycle stage. | [`Deleter`] |
//! | **Watch** | Restartable watch pump with resync. | [`Reflector`], [`PodSource`] |
//! | **HA** | Single-leader lifecycle envelope. | [`SchedulerProcess`] |
//! | **Driver** | Pluggable cluster-manager surface. | [`Driver`] |
//! | **Events** | Broadcast observability plane. | [`Event`], [`Bus`], [`Subscribe`] |
//!
//! ## Wiring example
//!
//! ```no_run
//! use std::sync::Arc;
//! use podvisor::{
//!     Config, ExecutorId, LogWriter, Scheduler, SchedulerProcess,
//! };
//! # use podvisor::{DriverFactory, PodSource, SchedulerError};
//! # async fn demo(
//! #     pod_source: Arc<dyn PodSource>,
//! #     make_driver: DriverFactory,
//! # ) -> Result<(), SchedulerError> {
//! let scheduler = Scheduler::new(
//!     Config::default(),
//!     ExecutorId("my-executor".into()),
//!     pod_source,
//!     vec![Arc::new(LogWriter)],
//! );
//!
//! let process = SchedulerProcess::new(scheduler.bus());
//! process.elect_standalone(make_driver);
//! process.end_on_signal();
//!
//! scheduler.run(&process).await?;
//! let status = process.join().await;
//! std::process::exit(podvisor::exit_code(status));
//! # }
//! ```
//!
//! Control flow: the HA process owns every spawned task. Leader election
//! gates binder/reflector startup; loss of leadership aborts the driver
//! and closes the Terminal token, which unwinds everything in reverse.
//!
//! ---

mod binder;
mod config;
mod deleter;
mod driver;
mod error;
mod events;
mod ha;
mod offers;
mod pod;
mod policies;
mod queue;
mod reflector;
mod registry;
mod scheduler;
mod source;
mod subscribers;

// ---- Public re-exports ----

pub use binder::Binder;
pub use config::Config;
pub use deleter::Deleter;
pub use driver::{
    Driver, DriverStatus, ExecutorId, Filters, TaskInfo, TaskStateCode, TaskStatus,
};
pub use error::SchedulerError;
pub use events::{Bus, Event, EventKind, Severity};
pub use ha::{exit_code, DriverFactory, LeadershipEvent, SchedulerProcess};
pub use offers::{Offer, OfferId, OfferRegistry, WalkAction, WalkOutcome};
pub use pod::{AdmissionVerdict, Pod, PodId, ResourceRequest};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use queue::Queuer;
pub use reflector::Reflector;
pub use registry::{PodTask, TaskId, TaskRegistry, TaskState};
pub use scheduler::Scheduler;
pub use source::{PodSource, WatchEvent};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
