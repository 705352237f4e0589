// src/main.rs
//! Folio Telemetry pipeline runner
//!
//! Reads one JSON occurrence per line from stdin and feeds it through the
//! pipeline until EOF or Ctrl-C, then flushes, logs statistics and writes
//! the optional history export.
//!
//! Usage: `folio-telemetry [CONFIG_FILE]`

use anyhow::{Context, Result};
use folio_telemetry::capture::{FilterRule, Occurrence};
use folio_telemetry::observability::{init_metrics, init_tracing};
use folio_telemetry::recording::dispatcher::DeliveryCallbacks;
use folio_telemetry::recording::{Exporter, Pipeline};
use folio_telemetry::utils::config::{ExportConfig, TelemetryConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => TelemetryConfig::load_from(Some(&path)),
        None => TelemetryConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.logging)?;
    let metrics = init_metrics()?;

    info!("Starting Folio Telemetry v{}", folio_telemetry::VERSION);
    debug!("Configuration loaded: {:?}", config);

    let sink = folio_telemetry::sink::from_config(&config.sink).await?;
    let rule = FilterRule::from_config(&config.filter)?;
    let callbacks = DeliveryCallbacks::default().on_error(|batch, err| {
        error!("Batch #{} ({} events) lost: {}", batch.sequence(), batch.len(), err);
    });

    let mut pipeline = Pipeline::new(config.pipeline.clone(), rule, sink)?.with_callbacks(callbacks);
    pipeline.start()?;
    info!("Session {}", pipeline.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => ingest(&pipeline, &line),
                None => {
                    info!("End of input");
                    break;
                }
            },
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!("Signal handler failed: {}", e);
                }
                info!("Received shutdown signal, flushing...");
                break;
            }
        }
    }

    pipeline.stop().await?;

    let totals = pipeline.pipeline_stats();
    info!(
        "Captured {} events ({} filtered, {} invalid); delivered {} events in {} batches, dropped {} batches",
        totals.capture.captured,
        totals.capture.dropped,
        totals.capture.invalid,
        totals.delivery.events_delivered,
        totals.delivery.batches_delivered,
        totals.delivery.batches_dropped
    );
    info!("Stats: {}", serde_json::to_string(&pipeline.stats())?);
    debug!("Metrics:\n{}", metrics.render());

    if let Some(export) = &config.export {
        write_export(&pipeline, export).await?;
    }

    Ok(())
}

fn ingest(pipeline: &Pipeline, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Occurrence>(line) {
        Ok(occurrence) => {
            pipeline.capture(occurrence);
        }
        Err(e) => warn!("Skipping malformed occurrence: {}", e),
    }
}

async fn write_export(pipeline: &Pipeline, export: &ExportConfig) -> Result<()> {
    let events = pipeline.history().snapshot();
    let body = Exporter::new(export.format).export(&events)?;
    tokio::fs::write(&export.path, body)
        .await
        .with_context(|| format!("Failed to write export to {:?}", export.path))?;
    info!("Exported {} events to {:?}", events.len(), export.path);
    Ok(())
}
