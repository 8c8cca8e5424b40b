//! Telemetry: logging setup and per-port counters.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{Counter, DiscardReason, LoadStats, MetricsRegistry, PortStats};
