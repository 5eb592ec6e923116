//! Prometheus metrics for benchmark clients.
//!
//! Every client operation (connect, search, batch upload, post-upload,
//! schema setup) records a counter, a latency histogram and an item-count
//! histogram. Without the `prometheus` feature the recording functions
//! compile to nothing.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering at the end of a run.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.latency_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Render the registry in Prometheus exposition format.
///
/// Returns `None` when metrics were never initialized.
pub fn render_metrics() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(|handle| handle.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

/// Record one client operation against the engine.
pub fn record_client_operation(
    engine: &str,
    operation: &str,
    status: &str,
    duration_secs: f64,
    item_count: usize,
) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "vecbench_client_operations_total",
            "engine" => engine.to_string(),
            "operation" => operation.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "vecbench_client_operation_duration_seconds",
            "engine" => engine.to_string(),
            "operation" => operation.to_string()
        )
        .record(duration_secs);

        histogram!(
            "vecbench_client_operation_items",
            "engine" => engine.to_string(),
            "operation" => operation.to_string()
        )
        .record(item_count as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (engine, operation, status, duration_secs, item_count);
    }
}

/// Metrics errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
