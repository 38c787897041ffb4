//! FOLIO Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing-subscriber`, and Prometheus gauges and
//! counters for the publish path, the consumers and the cache.

pub mod metrics;
pub mod tracer;

pub use metrics::{
    metrics_handler, metrics_router, render, report_until_shutdown, serve_metrics, FolioMetrics,
    MetricsConfig, METRICS,
};
pub use tracer::{init_tracing, TelemetryConfig, DEFAULT_LOG_FILTER};
