//! # GeoDB Client Observe - Observability Layer
//!
//! Centralized tracing initialization and metrics for the routing core.

#![deny(unsafe_code)]

use std::sync::OnceLock;

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Global Prometheus handle for rendering metrics
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod metrics;

/// Configuration for the tracing subscriber
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct TracingConfig {
    /// Service name reported in the startup log line
    #[builder(default = "geodb-client".to_string())]
    pub service_name: String,
    /// Filter directives used when `RUST_LOG` is not set
    #[builder(default = "info,geodb=debug".to_string())]
    pub default_filter: String,
    /// Include the event target (module path) in log lines
    #[builder(default = false)]
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Initialize tracing with the given configuration
pub fn init_tracing_with_config(config: TracingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(config.with_target));

    // Try to init, but don't fail if already initialized
    if subscriber.try_init().is_err() {
        tracing::debug!("Tracing already initialized, skipping");
        return Ok(());
    }

    tracing::info!(service = config.service_name, "Tracing initialized");

    Ok(())
}

/// Initialize tracing with default configuration
pub fn init_tracing() -> Result<()> {
    init_tracing_with_config(TracingConfig::default())
}

/// Initialize Prometheus metrics exporter and store the handle for rendering
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    let _ = PROMETHEUS_HANDLE.set(handle);

    metrics::init_metrics_descriptions();

    tracing::info!("Metrics exporter initialized");

    Ok(())
}

/// Render current metrics in Prometheus text format
///
/// Returns None if metrics haven't been initialized yet
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Initialize full observability stack
pub fn init() -> Result<()> {
    init_tracing()?;
    init_metrics()?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Once;

    use super::*;

    static INIT: Once = Once::new();

    #[test]
    fn test_init_tracing() {
        // Subscriber may already be set by other tests
        INIT.call_once(|| {
            let _ = init_tracing();
        });
    }

    #[test]
    fn test_tracing_config_defaults() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "geodb-client");
        assert_eq!(config.default_filter, "info,geodb=debug");
        assert!(!config.with_target);

        let custom = TracingConfig::builder()
            .service_name("orders-service")
            .default_filter("debug")
            .with_target(true)
            .build();
        assert_eq!(custom.service_name, "orders-service");
        assert_eq!(custom.default_filter, "debug");
        assert!(custom.with_target);
    }
}
