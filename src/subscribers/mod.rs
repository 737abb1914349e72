//! # Event subscribers: the sink side of the event plane.
//!
//! - [`Subscribe`] — trait for plugging custom sinks (logging, metrics, test
//!   assertions) into the scheduler
//! - [`SubscriberSet`] — non-blocking fan-out with per-subscriber bounded
//!   queues, worker tasks, and panic isolation
//! - [`LogWriter`] — built-in stdout sink

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
