//! Prometheus metrics for the scan loop, grounded in the
//! `prometheus_metric_storage::MetricStorage` derive used by the teacher's
//! `orderbook::api::metrics::ApiMetrics`.

use once_cell::sync::OnceCell;
use prometheus::{Encoder as _, Registry, TextEncoder};
use prometheus_metric_storage::MetricStorage;
use std::net::SocketAddr;
use warp::Filter;

static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// Returns the process-wide metric registry, creating it on first use.
pub fn get_metric_storage_registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

#[derive(MetricStorage, Clone, Debug)]
#[metric(subsystem = "scanner")]
pub struct ScannerMetrics {
    /// Number of ticks run per chain, labeled by outcome.
    #[metric(labels("chain", "outcome"))]
    pub ticks_total: prometheus::IntCounterVec,

    /// Number of logs dispatched to the ledger, labeled by chain and event kind.
    #[metric(labels("chain", "kind"))]
    pub events_dispatched_total: prometheus::IntCounterVec,

    /// Number of reorgs detected, labeled by chain.
    #[metric(labels("chain"))]
    pub reorgs_detected_total: prometheus::IntCounterVec,

    /// Current watermark per chain.
    #[metric(labels("chain"))]
    pub watermark: prometheus::IntGaugeVec,

    /// Current size of the recent-transaction window per chain.
    #[metric(labels("chain"))]
    pub window_size: prometheus::IntGaugeVec,

    /// Current adaptive span used by the log fetcher, per chain.
    #[metric(labels("chain"))]
    pub fetch_span: prometheus::IntGaugeVec,

    /// Time spent in a single tick, per chain.
    #[metric(labels("chain"))]
    pub tick_duration_seconds: prometheus::HistogramVec,
}

impl ScannerMetrics {
    pub fn instance() -> &'static Self {
        // Only fails if two incompatible metric sets were registered under
        // the same name, which cannot happen since this is the only
        // `MetricStorage` in the process.
        Self::instance_with_registry(get_metric_storage_registry())
            .expect("failed to register scanner metrics")
    }

    fn instance_with_registry(registry: &Registry) -> Result<&'static Self, prometheus::Error> {
        static INSTANCE: OnceCell<ScannerMetrics> = OnceCell::new();
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance);
        }
        let instance = <ScannerMetrics as MetricStorage>::instance(registry)?.clone();
        Ok(INSTANCE.get_or_init(|| instance))
    }
}

/// Spawns a task serving the registry's metrics as `GET /metrics` in the
/// Prometheus text exposition format, returning immediately.
pub fn serve_metrics(registry: Registry, address: SocketAddr) -> tokio::task::JoinHandle<()> {
    let route = warp::path("metrics").map(move || {
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("failed to encode metrics");
        buffer
    });
    tokio::task::spawn(warp::serve(route).bind(address))
}
