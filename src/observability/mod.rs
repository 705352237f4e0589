// src/observability/mod.rs
//! Logging and metrics setup for the binary
//!
//! The library only emits `tracing` events and `metrics` counters; installing
//! a subscriber and a recorder is left to the host process.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{Result, TelemetryError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| TelemetryError::ConfigError(format!("Tracing already initialised: {}", e)))
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            TelemetryError::ConfigError(format!("Invalid log level {:?}: {}", config.level, e))
        }),
    }
}

/// Install the Prometheus recorder; the handle renders the scrape text
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::ConfigError(format!("Metrics recorder: {}", e)))
}
