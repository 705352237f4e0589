// src/recording/compressor.rs
//! Batch encoding: JSON + zstd
//!
//! Used by persistent sinks to store a batch as one compressed blob.

use crate::capture::event::Event;
use crate::utils::errors::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// zstd level 1
    #[default]
    Fast,

    /// zstd level 3
    Balanced,

    /// zstd level 19
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// zstd compressor for encoded batches
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Serialize events to JSON and compress them
    pub fn encode(&self, events: &[Event]) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(events)
            .map_err(|e| TelemetryError::Serialization(format!("Batch encoding error: {}", e)))?;
        self.compress(&json)
    }

    /// Decompress and parse a blob produced by [`Compressor::encode`]
    pub fn decode(&self, data: &[u8]) -> Result<Vec<Event>> {
        let json = self.decompress(data)?;
        serde_json::from_slice(&json)
            .map_err(|e| TelemetryError::Serialization(format!("Batch decoding error: {}", e)))
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = zstd::encode_all(data, self.level.as_i32()).map_err(|e| {
            TelemetryError::CompressionFailed(format!("Compression error: {}", e))
        })?;

        debug!(
            "Compressed {} bytes -> {} bytes at level {}",
            data.len(),
            compressed.len(),
            self.level.as_i32()
        );

        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| {
            TelemetryError::CompressionFailed(format!("Decompression error: {}", e))
        })
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::default())
    }
}
