//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] — the extension point for plugging custom event
//! handlers into the scheduler.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Bounded queue** (configurable capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics caught, reported as `SubscriberPanicked`)
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow → event drop)
//! - Panics are isolated; they do not crash the scheduler or other subscribers
//! - Subscribers never block publishers

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for scheduler observability.
///
/// Receives events through a dedicated worker task with a bounded queue.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking operations
/// - Handle errors internally, do not panic
/// - Slow processing only affects this subscriber's own queue
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from the subscriber's dedicated worker, in FIFO order.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for overflow/panic reporting.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    ///
    /// When the queue is full the newest event is dropped for this
    /// subscriber only and a `SubscriberOverflow` event is published.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
