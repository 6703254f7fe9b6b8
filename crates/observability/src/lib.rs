//! Logging and metrics setup for the suggestd daemon: `tracing`-based
//! structured logs to stderr and a rotated file, and a Prometheus text
//! endpoint for the counters/gauges the rest of the crate graph emits.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, serve_metrics_text, MetricsConfig};
