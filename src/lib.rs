// src/lib.rs
//! Folio Telemetry
//!
//! Captures UI telemetry and admin activity-log occurrences from a
//! portfolio site, filters and redacts them, and delivers them in ordered
//! batches to a pluggable sink.
//!
//! # Architecture
//!
//! - **capture**: event model, sessions, filtering, sampling, redaction
//! - **recording**: buffering, batching, retrying delivery, export
//! - **sink**: delivery targets (memory, local SQLite store, HTTP)
//! - **query**: retained history, statistics and search
//! - **observability**: tracing subscriber and metrics recorder setup
//! - **utils**: configuration and errors
//!
//! # Example
//!
//! ```no_run
//! use folio_telemetry::capture::{ActivityCategory, FilterRule, Occurrence};
//! use folio_telemetry::recording::{Pipeline, PipelineConfig};
//! use folio_telemetry::sink::MemorySink;
//! use std::sync::Arc;
//!
//! # async fn run() -> folio_telemetry::Result<()> {
//! let sink = Arc::new(MemorySink::new());
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), FilterRule::allow_all(), sink)?;
//! pipeline.start()?;
//!
//! pipeline.capture(
//!     Occurrence::activity(ActivityCategory::Data, "project_update").with_entity("project:42"),
//! );
//!
//! pipeline.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod observability;
pub mod query;
pub mod recording;
pub mod sink;
pub mod utils;

pub use capture::{Event, EventKind, Occurrence};
pub use recording::{Pipeline, PipelineConfig};
pub use sink::{Sink, SinkConfig};
pub use utils::config::TelemetryConfig;
pub use utils::errors::{Result, SinkError, TelemetryError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
