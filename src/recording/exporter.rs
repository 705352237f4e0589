// src/recording/exporter.rs
//! Export captured events
//!
//! Supports:
//! - JSON (pretty array, same shape sinks receive)
//! - CSV (fixed activity-log columns for spreadsheets)

use crate::capture::event::Event;
use crate::utils::errors::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

const CSV_HEADER: [&str; 11] = [
    "ID",
    "Timestamp",
    "Actor",
    "Action",
    "Entity",
    "Category",
    "Severity",
    "Status",
    "Duration",
    "Changes",
    "Metadata",
];

/// Exporter for captured events
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Export events to a string
    pub fn export(&self, events: &[Event]) -> Result<String> {
        debug!("Exporting {} events to {:?} format", events.len(), self.format);

        match self.format {
            ExportFormat::Json => self.export_json(events),
            ExportFormat::Csv => self.export_csv(events),
        }
    }

    fn export_json(&self, events: &[Event]) -> Result<String> {
        serde_json::to_string_pretty(events)
            .map_err(|e| TelemetryError::ExportFailed(format!("JSON serialization error: {}", e)))
    }

    fn export_csv(&self, events: &[Event]) -> Result<String> {
        let mut out = String::new();
        push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));

        for event in events {
            let changes = match event.changes() {
                Some(changes) => to_json(changes)?,
                None => String::new(),
            };
            let metadata = if event.payload().is_empty() {
                String::new()
            } else {
                to_json(event.payload())?
            };

            push_row(
                &mut out,
                [
                    event.id().to_string(),
                    event.timestamp().to_rfc3339(),
                    event.actor_id().unwrap_or_default().to_string(),
                    event.action().to_string(),
                    event.entity().unwrap_or_default().to_string(),
                    event.kind().label().to_string(),
                    event.severity().map(|s| s.label()).unwrap_or_default().to_string(),
                    event.status().map(|s| s.label()).unwrap_or_default().to_string(),
                    event.duration_ms().map(|d| d.to_string()).unwrap_or_default(),
                    changes,
                    metadata,
                ],
            );
        }

        Ok(out)
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| TelemetryError::ExportFailed(format!("JSON serialization error: {}", e)))
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let row: Vec<String> = fields.into_iter().map(|f| quote(&f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

/// RFC 4180 field quoting
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
