// src/utils/mod.rs
//! Shared utilities: configuration and error types

pub mod config;
pub mod errors;

pub use config::TelemetryConfig;
pub use errors::{Result, SinkError, TelemetryError};
