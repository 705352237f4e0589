// src/sink/mod.rs
//! Delivery backends
//!
//! Every backend implements the same [`Sink`] capability. Which one a
//! pipeline uses is decided once, at construction, by [`from_config`]:
//!
//! - **Memory**: keeps delivered batches in process (tests, development)
//! - **Local Store**: keyed persistence in SQLite with zstd-compressed batches
//! - **Http**: POSTs each batch as a JSON array to a remote endpoint
//!
//! Backends only differ in how `write` fails; the dispatcher applies one
//! retry/backoff contract to all of them.

pub mod http;
pub mod local_store;
pub mod memory;

pub use http::{HttpSink, HttpSinkConfig};
pub use local_store::{LocalStoreConfig, LocalStoreSink};
pub use memory::MemorySink;

use crate::recording::buffer::Batch;
use crate::utils::errors::{Result, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Acknowledgement of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Number of events the backend accepted
    pub accepted: usize,
}

/// Storage/delivery capability consumed by the dispatcher
#[async_trait]
pub trait Sink: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Write one batch
    async fn write(&self, batch: &Batch) -> std::result::Result<Ack, SinkError>;
}

/// Sink selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Memory,
    LocalStore(LocalStoreConfig),
    Http(HttpSinkConfig),
}

/// Build the configured sink
pub async fn from_config(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    let sink: Arc<dyn Sink> = match config {
        SinkConfig::Memory => Arc::new(MemorySink::new()),
        SinkConfig::LocalStore(store) => Arc::new(LocalStoreSink::open(store.clone()).await?),
        SinkConfig::Http(http) => Arc::new(HttpSink::new(http.clone())?),
    };
    info!("Using {} sink", sink.name());
    Ok(sink)
}
