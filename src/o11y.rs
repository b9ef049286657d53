//! Telemetry lifecycle
//!
//! The engine records through the `metrics` facade only; installing and
//! tearing down an exporter is owned by the process entry point. With the
//! `prometheus` feature enabled an HTTP scrape endpoint is exposed for the
//! duration of the run; without it the facade calls are no-ops.

/// Installs the metrics exporter at process start
///
/// When the `prometheus` feature is enabled, this sets up the Prometheus
/// scrape endpoint. When disabled, it's a no-op.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        match PrometheusBuilder::new().install() {
            Ok(()) => tracing::info!("Prometheus metrics exporter installed"),
            Err(e) => tracing::warn!("failed to install Prometheus metrics exporter: {e}"),
        }
    }
}

/// Tears down telemetry at process end
///
/// The Prometheus exporter is scrape-based and holds no buffered data, so
/// there is nothing to flush; the hook exists so the lifecycle stays
/// explicit in `main`.
pub fn shutdown_metrics_exporter() {}
