//! # SchedulerProcess: leadership, driver ownership, and termination.
//!
//! The process is the one construction site for the driver and the one
//! owner of the Terminal signal. Scheduling work (binder, reflector,
//! sweeper) runs only inside the window `[master won, terminal closed)`.
//!
//! ## Lifecycle
//! - [`elect`](SchedulerProcess::elect) consumes leadership events from the
//!   election transport. On the first `Elected` it constructs the driver
//!   via the factory, calls `start()`, and fulfils every
//!   [`master`](SchedulerProcess::master) waiter.
//! - `Lost` at any point aborts the driver, prints `leadership lost` on
//!   stderr, and closes Terminal.
//! - [`end`](SchedulerProcess::end) is the user-initiated graceful stop:
//!   `stop(failover = true)` on the driver, then Terminal.
//! - [`fail`](SchedulerProcess::fail) is the fatal path for driver errors:
//!   abort, then Terminal.
//! - [`join`](SchedulerProcess::join) blocks until the driver reports
//!   `Stopped` or `Aborted`; [`exit_code`] maps that to the process exit.
//!
//! ## Rules
//! - Terminal is closed exactly once; closing it cancels every child token
//!   handed out via [`terminal`](SchedulerProcess::terminal).
//! - No lock is held across suspension; the driver slot is write-once.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, DriverStatus};
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};

/// Constructs the driver once leadership is won.
///
/// Tests inject factories returning mock drivers; production factories
/// build the real cluster-manager client.
pub type DriverFactory =
    Box<dyn FnOnce() -> Result<Arc<dyn Driver>, SchedulerError> + Send + 'static>;

/// Outcome notifications from the election transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// This process is now the leader.
    Elected,
    /// Leadership was taken away; all scheduling work must stop.
    Lost,
}

/// Single-leader supervision envelope.
pub struct SchedulerProcess {
    terminal: CancellationToken,
    master_tx: watch::Sender<bool>,
    master_rx: watch::Receiver<bool>,
    driver: OnceLock<Arc<dyn Driver>>,
    terminal_closed: AtomicBool,
    /// Keeps the standalone election channel open for the process lifetime.
    standalone_tx: OnceLock<mpsc::Sender<LeadershipEvent>>,
    bus: Bus,
}

impl SchedulerProcess {
    /// Creates a process in the Initial state.
    pub fn new(bus: Bus) -> Arc<Self> {
        let (master_tx, master_rx) = watch::channel(false);
        Arc::new(Self {
            terminal: CancellationToken::new(),
            master_tx,
            master_rx,
            driver: OnceLock::new(),
            terminal_closed: AtomicBool::new(false),
            standalone_tx: OnceLock::new(),
            bus,
        })
    }

    /// Returns a child token that fires when Terminal closes.
    ///
    /// Every blocking operation in the core is bounded by one of these.
    pub fn terminal(&self) -> CancellationToken {
        self.terminal.child_token()
    }

    /// True once Terminal has closed.
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_cancelled()
    }

    /// Waits for the master window to open and returns the started driver.
    ///
    /// Fails with `Cancelled` if Terminal closes first.
    pub async fn master(&self) -> Result<Arc<dyn Driver>, SchedulerError> {
        let mut rx = self.master_rx.clone();
        tokio::select! {
            _ = self.terminal.cancelled() => Err(SchedulerError::Cancelled),
            res = rx.wait_for(|open| *open) => match res {
                Ok(_) => Ok(Arc::clone(self.driver.get().expect("master opened without driver"))),
                Err(_) => Err(SchedulerError::Cancelled),
            },
        }
    }

    /// Starts leader-election supervision.
    ///
    /// Consumes `leadership` until the first `Elected`, then constructs and
    /// starts the driver and opens the master window. A `Lost` at any time
    /// aborts the driver and closes Terminal. A closed election channel
    /// before winning counts as a loss; after winning it merely means the
    /// elector went away and the process runs until `end()`.
    pub fn elect(
        self: &Arc<Self>,
        factory: DriverFactory,
        mut leadership: mpsc::Receiver<LeadershipEvent>,
    ) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            // Standby: wait to win.
            loop {
                tokio::select! {
                    _ = me.terminal.cancelled() => return,
                    ev = leadership.recv() => match ev {
                        Some(LeadershipEvent::Elected) => break,
                        Some(LeadershipEvent::Lost) | None => {
                            me.on_leadership_lost().await;
                            return;
                        }
                    }
                }
            }

            // Won: construct and start the driver.
            let driver = match factory() {
                Ok(driver) => driver,
                Err(e) => {
                    me.bus.publish(
                        Event::now(EventKind::LeadershipLost).with_error(e.to_string()),
                    );
                    me.close_terminal();
                    return;
                }
            };
            match driver.start().await {
                Ok(DriverStatus::Running) => {}
                Ok(status) => {
                    let _ = driver.abort().await;
                    me.bus.publish(
                        Event::now(EventKind::LeadershipLost)
                            .with_error(format!("driver start returned {}", status.as_label())),
                    );
                    me.close_terminal();
                    return;
                }
                Err(e) => {
                    let _ = driver.abort().await;
                    me.bus
                        .publish(Event::now(EventKind::LeadershipLost).with_error(e.to_string()));
                    me.close_terminal();
                    return;
                }
            }

            let _ = me.driver.set(Arc::clone(&driver));
            me.bus.publish(Event::now(EventKind::ElectedMaster));
            let _ = me.master_tx.send(true);

            // Master: hold the window open until loss or termination.
            loop {
                tokio::select! {
                    _ = me.terminal.cancelled() => return,
                    ev = leadership.recv() => match ev {
                        Some(LeadershipEvent::Lost) => {
                            me.on_leadership_lost().await;
                            return;
                        }
                        Some(LeadershipEvent::Elected) => continue,
                        None => {
                            // Elector went away; keep serving until end().
                            me.terminal.cancelled().await;
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Elects immediately with no external elector (single-instance mode).
    pub fn elect_standalone(self: &Arc<Self>, factory: DriverFactory) {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(LeadershipEvent::Elected);
        let _ = self.standalone_tx.set(tx);
        self.elect(factory, rx);
    }

    /// User-initiated graceful stop: `stop(true)` then Terminal.
    pub async fn end(&self) {
        if let Some(driver) = self.driver.get() {
            let _ = driver.stop(true).await;
        }
        self.close_terminal();
    }

    /// Fatal driver failure: abort then Terminal. The process exits
    /// non-zero via [`join`](Self::join) + [`exit_code`].
    pub async fn fail(&self, reason: &str) {
        self.bus
            .publish(Event::now(EventKind::LeadershipLost).with_error(reason.to_string()));
        if let Some(driver) = self.driver.get() {
            let _ = driver.abort().await;
        }
        self.close_terminal();
    }

    /// Blocks until the driver reports `Stopped` or `Aborted`.
    ///
    /// Before a driver exists this resolves when Terminal closes, as
    /// `Aborted`: the process never got to do any work.
    pub async fn join(&self) -> DriverStatus {
        match self.master().await {
            Ok(driver) => driver.join().await.unwrap_or(DriverStatus::Aborted),
            // Terminal closed; join whatever driver exists, if any.
            Err(_) => match self.driver.get() {
                Some(driver) => driver.join().await.unwrap_or(DriverStatus::Aborted),
                None => DriverStatus::Aborted,
            },
        }
    }

    /// Spawns a task that turns the first OS termination signal into a
    /// graceful [`end`](Self::end).
    pub fn end_on_signal(self: &Arc<Self>) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = me.terminal.cancelled() => {}
                res = super::signals::wait_for_shutdown_signal() => {
                    if res.is_ok() {
                        me.end().await;
                    }
                }
            }
        });
    }

    async fn on_leadership_lost(&self) {
        eprintln!("leadership lost");
        self.bus.publish(Event::now(EventKind::LeadershipLost));
        if let Some(driver) = self.driver.get() {
            let _ = driver.abort().await;
        }
        self.close_terminal();
    }

    /// Closes Terminal exactly once and broadcasts it.
    fn close_terminal(&self) {
        if self
            .terminal_closed
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return;
        }
        self.bus.publish(Event::now(EventKind::TerminalClosed));
        self.terminal.cancel();
    }
}

/// Maps the joined driver status to a process exit code: graceful stop is
/// zero, everything else non-zero.
pub fn exit_code(status: DriverStatus) -> i32 {
    match status {
        DriverStatus::Stopped => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    use crate::driver::{Filters, TaskInfo, TaskStatus};
    use crate::offers::OfferId;
    use crate::registry::TaskId;

    /// Driver that tracks status transitions and supports a blocking join,
    /// like a real client would.
    struct StatusDriver {
        status: std::sync::Mutex<DriverStatus>,
        done: Notify,
    }

    impl StatusDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                status: std::sync::Mutex::new(DriverStatus::NotStarted),
                done: Notify::new(),
            })
        }

        fn status(&self) -> DriverStatus {
            *self.status.lock().unwrap()
        }
    }

    #[async_trait]
    impl Driver for StatusDriver {
        async fn start(&self) -> Result<DriverStatus, SchedulerError> {
            let mut status = self.status.lock().unwrap();
            if *status != DriverStatus::NotStarted {
                return Err(SchedulerError::Driver {
                    reason: format!("cannot start driver in status {}", status.as_label()),
                });
            }
            *status = DriverStatus::Running;
            Ok(*status)
        }
        async fn stop(&self, _failover: bool) -> Result<DriverStatus, SchedulerError> {
            *self.status.lock().unwrap() = DriverStatus::Stopped;
            self.done.notify_waiters();
            Ok(DriverStatus::Stopped)
        }
        async fn abort(&self) -> Result<DriverStatus, SchedulerError> {
            *self.status.lock().unwrap() = DriverStatus::Aborted;
            self.done.notify_waiters();
            Ok(DriverStatus::Aborted)
        }
        async fn join(&self) -> Result<DriverStatus, SchedulerError> {
            loop {
                let notified = self.done.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let status = *self.status.lock().unwrap();
                    if matches!(status, DriverStatus::Stopped | DriverStatus::Aborted) {
                        return Ok(status);
                    }
                }
                notified.await;
            }
        }
        async fn launch_tasks(
            &self,
            _o: &[OfferId],
            _t: &[TaskInfo],
            _f: &Filters,
        ) -> Result<DriverStatus, SchedulerError> {
            Ok(self.status())
        }
        async fn kill_task(&self, _t: &TaskId) -> Result<DriverStatus, SchedulerError> {
            Ok(self.status())
        }
        async fn decline_offer(
            &self,
            _o: &OfferId,
            _f: &Filters,
        ) -> Result<DriverStatus, SchedulerError> {
            Ok(self.status())
        }
        async fn reconcile_tasks(&self, _s: &[TaskStatus]) -> Result<DriverStatus, SchedulerError> {
            Ok(self.status())
        }
    }

    fn factory(driver: Arc<StatusDriver>) -> DriverFactory {
        Box::new(move || Ok(driver as Arc<dyn Driver>))
    }

    #[tokio::test]
    async fn standalone_election_opens_the_master_window() {
        let process = SchedulerProcess::new(Bus::new(64));
        let driver = StatusDriver::new();
        process.elect_standalone(factory(driver.clone()));

        let handed = process.master().await.unwrap();
        assert_eq!(driver.status(), DriverStatus::Running);
        assert_eq!(
            handed.reconcile_tasks(&[]).await.unwrap(),
            DriverStatus::Running,
        );
    }

    #[tokio::test]
    async fn end_stops_driver_and_closes_terminal() {
        let process = SchedulerProcess::new(Bus::new(64));
        let driver = StatusDriver::new();
        process.elect_standalone(factory(driver.clone()));
        process.master().await.unwrap();

        let terminal = process.terminal();
        process.end().await;
        terminal.cancelled().await;

        assert_eq!(process.join().await, DriverStatus::Stopped);
        assert_eq!(exit_code(DriverStatus::Stopped), 0);
    }

    #[tokio::test]
    async fn leadership_loss_aborts_and_terminates() {
        let process = SchedulerProcess::new(Bus::new(64));
        let driver = StatusDriver::new();
        let (tx, rx) = mpsc::channel(4);
        process.elect(factory(driver.clone()), rx);

        tx.send(LeadershipEvent::Elected).await.unwrap();
        process.master().await.unwrap();

        tx.send(LeadershipEvent::Lost).await.unwrap();
        process.terminal().cancelled().await;

        assert_eq!(driver.status(), DriverStatus::Aborted);
        assert_eq!(process.join().await, DriverStatus::Aborted);
        assert_eq!(exit_code(DriverStatus::Aborted), 1);
    }

    #[tokio::test]
    async fn loss_before_winning_never_starts_the_driver() {
        let process = SchedulerProcess::new(Bus::new(64));
        let driver = StatusDriver::new();
        let (tx, rx) = mpsc::channel(4);
        process.elect(factory(driver.clone()), rx);

        tx.send(LeadershipEvent::Lost).await.unwrap();
        process.terminal().cancelled().await;

        assert_eq!(driver.status(), DriverStatus::NotStarted);
        assert!(matches!(
            process.master().await,
            Err(SchedulerError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn fail_aborts_the_driver() {
        let process = SchedulerProcess::new(Bus::new(64));
        let driver = StatusDriver::new();
        process.elect_standalone(factory(driver.clone()));
        process.master().await.unwrap();

        process.fail("socket error").await;
        assert_eq!(driver.status(), DriverStatus::Aborted);
        assert_eq!(process.join().await, DriverStatus::Aborted);
    }

    #[tokio::test]
    async fn double_start_is_rejected_by_the_driver() {
        let driver = StatusDriver::new();
        driver.start().await.unwrap();
        let err = driver.start().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Driver { .. }));
    }

    #[tokio::test]
    async fn terminal_tokens_fire_for_every_child() {
        let process = SchedulerProcess::new(Bus::new(64));
        let a = process.terminal();
        let b = process.terminal();
        let driver = StatusDriver::new();
        process.elect_standalone(factory(driver));
        process.master().await.unwrap();

        process.end().await;
        tokio::time::timeout(Duration::from_secs(1), async {
            a.cancelled().await;
            b.cancelled().await;
        })
        .await
        .unwrap();
    }
}
