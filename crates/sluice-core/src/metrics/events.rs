//! Internal events shared by every polling component.
//!
//! Domain events live next to the code that raises them; this module owns the
//! `InternalEvent` trait and the polling loop's own events.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Result type for polling iteration metrics.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// Event emitted when a polling iteration completes.
pub struct IterationCompleted {
    /// Service identifier.
    pub service: &'static str,
    pub result: IterationResultType,
    /// Target label, e.g. the cluster being observed.
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(
            service = self.service,
            result = self.result.as_str(),
            target = %self.target,
            "Iteration completed"
        );
        counter!(
            "polling_iterations_total",
            "service" => self.service,
            "result" => self.result.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Event emitted to track polling iteration duration.
pub struct IterationDuration {
    pub service: &'static str,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        trace!(
            service = self.service,
            duration_ms = self.duration.as_millis(),
            target = %self.target,
            "Iteration duration"
        );
        histogram!(
            "polling_iteration_duration_seconds",
            "service" => self.service,
            "target" => self.target
        )
        .record(self.duration.as_secs_f64());
    }
}
