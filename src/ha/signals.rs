//! # OS signal handling for graceful shutdown.
//!
//! [`wait_for_shutdown_signal`] completes when the process receives a
//! termination signal (`SIGINT`/`SIGTERM` on Unix, Ctrl-C elsewhere).
//! [`SchedulerProcess::end_on_signal`](crate::ha::SchedulerProcess::end_on_signal)
//! wires it to a graceful `end()`.

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners. Returns `Ok(())` when a
/// signal is received, or `Err` if listener registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal (Ctrl-C on non-Unix platforms).
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
