//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stdout in a human-readable format.
//!
//! ## Output format
//! ```text
//! I scheduled pod=default/web-1 node=h1 task=default_web-1.3f2a
//! W failedScheduling pod=default/web-1 err="no suitable offer for pod default/web-1"
//! I killing pod=default/web-1 task=default_web-1.3f2a
//! W lost pod=default/web-1 err="TASK_LOST: slave removed"
//! ```
//!
//! Not intended for production use — implement a custom
//! [`Subscribe`](crate::Subscribe) for structured logging or metrics.

use async_trait::async_trait;

use crate::events::{Event, Severity};
use crate::subscribers::Subscribe;

/// Simple stdout logging subscriber.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let sev = match e.kind.severity() {
            Severity::Info => 'I',
            Severity::Warn => 'W',
        };
        let mut line = format!("{sev} {}", e.kind.reason());
        if let Some(pod) = &e.pod {
            line.push_str(&format!(" pod={pod}"));
        }
        if let Some(node) = &e.node {
            line.push_str(&format!(" node={node}"));
        }
        if let Some(task) = &e.task_id {
            line.push_str(&format!(" task={task}"));
        }
        if let Some(offer) = &e.offer {
            line.push_str(&format!(" offer={offer}"));
        }
        if let Some(delay) = e.delay {
            line.push_str(&format!(" delay={delay:?}"));
        }
        if let Some(attempt) = e.attempt {
            line.push_str(&format!(" attempt={attempt}"));
        }
        if let Some(err) = &e.error {
            line.push_str(&format!(" err={err:?}"));
        }
        println!("{line}");
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
