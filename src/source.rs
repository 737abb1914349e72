//! # Pod source: the control-plane side of the scheduler.
//!
//! [`PodSource`] abstracts the watchable pod API: list everything, watch
//! from a resume point, and record bindings. The reflector owns the watch
//! loop; the binder calls [`PodSource::bind`] once per successful placement.
//!
//! ## Watch semantics
//! A watch is a lazy, restartable sequence of [`WatchEvent`]s carrying an
//! opaque resume token (`resource_version`). On stream error the reflector
//! restarts the watch with backoff; a periodic full [`list`](PodSource::list)
//! heals anything a dropped stream missed.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SchedulerError;
use crate::pod::{Pod, PodId};

/// One observed change on the pod collection.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// A pod appeared.
    Added(Pod),
    /// A pod changed (including acquiring a node assignment).
    Modified(Pod),
    /// A pod was deleted.
    Deleted(Pod),
    /// The stream hit an error; the receiver should restart the watch.
    Error(String),
}

/// Consumer contract for the control plane's pod API.
#[async_trait]
pub trait PodSource: Send + Sync + 'static {
    /// Lists all pods along with the resource version the list reflects.
    async fn list(&self) -> Result<(Vec<Pod>, u64), SchedulerError>;

    /// Opens a watch stream starting after `resource_version`.
    ///
    /// The returned channel closes when the stream ends; the caller decides
    /// whether to restart.
    async fn watch(
        &self,
        resource_version: u64,
    ) -> Result<mpsc::Receiver<WatchEvent>, SchedulerError>;

    /// Records on the control plane that `pod` is assigned to `node`.
    async fn bind(&self, pod: &PodId, node: &str) -> Result<(), SchedulerError>;
}
