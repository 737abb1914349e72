//! # Event plane: bus + event types.
//!
//! Everything observable about the scheduler flows through here. Components
//! publish [`Event`]s to the [`Bus`]; the subscriber set fans them out to
//! sinks (logging, tests, metrics) without blocking publishers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, Severity};
