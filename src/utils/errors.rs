// src/utils/errors.rs
//! Error types for the telemetry pipeline
//!
//! Capture-path errors are isolated per occurrence and delivery-path errors
//! per batch; none of them is fatal to the host application.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Malformed occurrence, dropped and never retried
    #[error("Invalid occurrence: {0}")]
    Validation(String),

    /// Payload cannot be encoded for the chosen sink
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Transient sink failure
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Sink refused the write
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage failed: {0}")]
    StorageFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`Sink`](crate::sink::Sink) write
///
/// The dispatcher treats every variant as "failure(reason)" and only looks at
/// [`SinkError::is_retryable`] to decide between backoff and an immediate drop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    Permission(String),
}

impl SinkError {
    /// Only transient unavailability is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }

    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            SinkError::Serialization(_) => "serialization",
            SinkError::Unavailable(_) => "unavailable",
            SinkError::Permission(_) => "permission",
        }
    }
}

impl From<SinkError> for TelemetryError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Serialization(msg) => TelemetryError::Serialization(msg),
            SinkError::Unavailable(msg) => TelemetryError::SinkUnavailable(msg),
            SinkError::Permission(msg) => TelemetryError::Permission(msg),
        }
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        TelemetryError::ConfigError(err.to_string())
    }
}
