//! Session metrics collection

mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};

// Constants for metrics collection
pub(crate) const MAX_METRICS_HISTORY: usize = 1000;
