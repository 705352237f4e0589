// src/recording/mod.rs
//! Buffering, batching and delivery
//!
//! - **Buffer**: ordered pending events, sealed into numbered batches
//! - **Dispatcher**: delivers one batch to the sink with retry/backoff
//! - **Pipeline**: owns filter, buffer, timer and delivery tasks
//! - **Compressor**: zstd batch encoding for persistent sinks
//! - **Exporter**: JSON and CSV export
//!
//! # Architecture
//!
//! ```text
//! capture() → EventFilter → EventBuffer ──(size reached)──┐
//!                              ↑   ↑                      ↓
//!                      requeue │   └──(timer tick)──→ Batch
//!                              │                          ↓
//!                              └──(cancelled)── SinkDispatcher → Sink
//!                                                (retry, backoff)
//! ```

pub mod buffer;
pub mod compressor;
pub mod dispatcher;
pub mod exporter;
pub mod pipeline;

pub use buffer::{Batch, BufferStats, EventBuffer};
pub use compressor::{CompressionLevel, Compressor};
pub use dispatcher::{DeliveryCallbacks, DeliveryCounters, DeliveryOutcome, DeliveryStats, RetryPolicy, SinkDispatcher};
pub use exporter::{ExportFormat, Exporter};
pub use pipeline::{CaptureStats, Pipeline, PipelineConfig, PipelineStats};
