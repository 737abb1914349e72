//! # HA process: the single-leader lifecycle envelope.
//!
//! Every other component runs inside the window this module defines:
//!
//! ```text
//! Initial ──Elect──▶ Standby ──won──▶ Master ──(stop|abort|lost)──▶ Terminal
//!                          ▲───lost────┘
//! ```
//!
//! - [`SchedulerProcess`] — owns the driver and the Terminal signal
//! - [`DriverFactory`] — constructs the driver once leadership is won
//! - [`LeadershipEvent`] — the narrow interface to the election transport
//! - [`signals`] — OS signal hook for a graceful `end()`

mod process;
pub mod signals;

pub use process::{exit_code, DriverFactory, LeadershipEvent, SchedulerProcess};
