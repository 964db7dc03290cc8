use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::config::MetricsConfig;
use crate::utils::error::{AppError, Result};

/// Starts the Prometheus scrape endpoint when enabled. Counters recorded
/// before this call, or with the exporter disabled, are dropped.
pub fn install_exporter(config: &MetricsConfig) -> Result<Option<SocketAddr>> {
    if !config.enabled {
        return Ok(None);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Telemetry(format!("prometheus exporter on {}: {}", addr, e)))?;

    tracing::info!(%addr, "metrics exporter listening");
    Ok(Some(addr))
}
