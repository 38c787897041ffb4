//! Prometheus Metrics Definitions
//!
//! Publish outcomes are counted as they happen on the write path. Consumer
//! progress, consumer lag and cache statistics are sampled on an interval by
//! [`report_until_shutdown`] and exposed as gauges, so the staleness window
//! of every process can be watched from one scrape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use folio_cache::{CacheClient, CacheStats};
use folio_core::Topic;
use folio_events::{consumer_lag, ConsumerConfig, ConsumerMetrics, ConsumerSnapshot, EventLog};
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::{ApiError, ApiResult};

pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9464";
pub const DEFAULT_METRICS_REFRESH_SECS: u64 = 5;

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FolioMetrics>> = Lazy::new(FolioMetrics::new);

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Listen address of the `/metrics` endpoint
    pub addr: SocketAddr,
    /// Wait between gauge refreshes (default: 5s)
    pub refresh_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9464)),
            refresh_interval: Duration::from_secs(DEFAULT_METRICS_REFRESH_SECS),
        }
    }
}

impl MetricsConfig {
    /// Create MetricsConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_METRICS_ADDR`: listen address (default: 0.0.0.0:9464)
    /// - `FOLIO_METRICS_REFRESH_SECS`: gauge refresh interval (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let addr = match std::env::var("FOLIO_METRICS_ADDR") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(value = %raw, error = %e, default = DEFAULT_METRICS_ADDR, "Invalid FOLIO_METRICS_ADDR");
                defaults.addr
            }),
            Err(_) => defaults.addr,
        };
        let refresh_interval = std::env::var("FOLIO_METRICS_REFRESH_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u64| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.refresh_interval);

        Self {
            addr,
            refresh_interval,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Container for all FOLIO metrics.
#[derive(Clone)]
pub struct FolioMetrics {
    /// Event publish counter - labels: topic, status (success/failure)
    pub events_published_total: CounterVec,

    /// Records handled by each consumer since it started - labels: topic,
    /// outcome (applied, decode_failed, apply_failed, commit_failed, poll_error)
    pub consumer_records: GaugeVec,

    /// Records not yet committed by the consumer group - labels: topic
    pub consumer_lag: GaugeVec,

    /// Cache backend statistics - labels: stat (hits, misses, entries, errors)
    pub cache_stats: GaugeVec,
}

impl FolioMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            events_published_total: register_counter_vec!(
                "folio_events_published_total",
                "Total number of event publish attempts",
                &["topic", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register events_published_total: {}", e)))?,

            consumer_records: register_gauge_vec!(
                "folio_consumer_records",
                "Records handled by the running consumer, by outcome",
                &["topic", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register consumer_records: {}", e)))?,

            consumer_lag: register_gauge_vec!(
                "folio_consumer_lag",
                "Retained records not yet committed by the consumer group",
                &["topic"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register consumer_lag: {}", e)))?,

            cache_stats: register_gauge_vec!(
                "folio_cache_stats",
                "Cache backend statistics",
                &["stat"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_stats: {}", e)))?,
        })
    }

    /// Record one publish attempt.
    pub fn record_publish(&self, topic: Topic, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.events_published_total
            .with_label_values(&[topic.name(), status])
            .inc();
    }

    /// Mirror a consumer's counters.
    pub fn observe_consumer(&self, topic: Topic, snapshot: &ConsumerSnapshot) {
        for (outcome, value) in [
            ("applied", snapshot.records_applied),
            ("decode_failed", snapshot.decode_failures),
            ("apply_failed", snapshot.handler_failures),
            ("commit_failed", snapshot.commit_failures),
            ("poll_error", snapshot.poll_errors),
        ] {
            self.consumer_records
                .with_label_values(&[topic.name(), outcome])
                .set(value as f64);
        }
    }

    pub fn set_consumer_lag(&self, topic: Topic, lag: u64) {
        self.consumer_lag
            .with_label_values(&[topic.name()])
            .set(lag as f64);
    }

    pub fn observe_cache(&self, stats: &CacheStats) {
        for (stat, value) in [
            ("hits", stats.hits),
            ("misses", stats.misses),
            ("entries", stats.entry_count),
            ("errors", stats.errors),
        ] {
            self.cache_stats.with_label_values(&[stat]).set(value as f64);
        }
    }

    /// Sample every consumer, its group's lag and the cache once.
    pub async fn refresh(
        &self,
        log: &dyn EventLog,
        consumer_config: &ConsumerConfig,
        consumers: &[(Topic, Arc<ConsumerMetrics>)],
        cache: &CacheClient,
    ) {
        for (topic, counters) in consumers {
            self.observe_consumer(*topic, &counters.snapshot());
            match consumer_lag(log, &consumer_config.group_for(*topic), *topic).await {
                Ok(lag) => self.set_consumer_lag(*topic, lag),
                Err(e) => tracing::warn!(error = %e, topic = %topic, "Failed to measure consumer lag"),
            }
        }
        match cache.stats().await {
            Ok(stats) => self.observe_cache(&stats),
            Err(e) => tracing::warn!(error = %e, "Failed to read cache stats"),
        }
    }
}

// ============================================================================
// EXPOSITION
// ============================================================================

/// Every registered metric in Prometheus text format.
pub fn render() -> ApiResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ApiError::internal_error(format!("Metrics are not UTF-8: {}", e)))
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message,
            )
        }
    }
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve `/metrics` until the shutdown signal flips to `true`.
pub async fn serve_metrics(addr: SocketAddr, mut shutdown_rx: watch::Receiver<bool>) -> ApiResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind metrics listener on {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "Metrics endpoint listening");

    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(async move {
            // A dropped sender also means shutdown.
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Metrics endpoint failed: {}", e)))
}

/// Refresh the sampled gauges every `refresh_interval` until shutdown.
pub async fn report_until_shutdown(
    log: Arc<dyn EventLog>,
    consumer_config: ConsumerConfig,
    consumers: [(Topic, Arc<ConsumerMetrics>); 2],
    cache: CacheClient,
    refresh_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let metrics = match METRICS.as_ref() {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::error!(error = %e, "Metrics unavailable, reporter not started");
            return;
        }
    };

    let mut ticker = interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                metrics.refresh(log.as_ref(), &consumer_config, &consumers, &cache).await;
            }
        }
    }
}
