//! FOLIO Cache Consumer Entry Point
//!
//! Follows `team.activity` and `asset.changes` on the LMDB event log and
//! applies every event to the Redis cache until ctrl-c. Consumer progress,
//! lag and cache statistics are served on `/metrics`.

use std::sync::Arc;

use folio_api::telemetry::{report_until_shutdown, serve_metrics};
use folio_api::{init_tracing, ApiResult, FolioConfig};
use folio_cache::{CacheClient, RedisCacheStore};
use folio_events::{spawn_cache_consumers, CacheEventHandler, LmdbEventLog};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = FolioConfig::from_env();
    init_tracing(&config.telemetry)?;
    config.log_summary();

    let log = Arc::new(LmdbEventLog::open(&config.event_log)?);
    let cache_store = Arc::new(RedisCacheStore::connect(&config.redis).await?);
    let cache = CacheClient::new(cache_store, config.cache.clone());
    let handler = Arc::new(CacheEventHandler::new(cache.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = spawn_cache_consumers(
        log.clone(),
        handler,
        config.consumer.clone(),
        shutdown_rx.clone(),
    );
    tracing::info!(group = %config.consumer.group, "Cache consumers running");

    let reporter = tokio::spawn(report_until_shutdown(
        log,
        config.consumer.clone(),
        consumers.metrics(),
        cache,
        config.metrics.refresh_interval,
        shutdown_rx.clone(),
    ));
    let endpoint = tokio::spawn(serve_metrics(config.metrics.addr, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    // Receivers may already be gone if both tasks exited early.
    let _ = shutdown_tx.send(true);

    let (team, asset) = consumers.join().await;
    tracing::info!(team = ?team, asset = ?asset, "Cache consumers stopped");

    if let Err(e) = reporter.await {
        tracing::error!(error = %e, "Metrics reporter task failed");
    }
    match endpoint.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Metrics endpoint stopped with an error"),
        Err(e) => tracing::error!(error = %e, "Metrics endpoint task failed"),
    }
    Ok(())
}
