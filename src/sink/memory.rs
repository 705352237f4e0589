// src/sink/memory.rs
//! In-memory sink
//!
//! Keeps every delivered batch. Failures can be scripted so retry and drop
//! behaviour can be exercised without a real backend.

use crate::capture::event::Event;
use crate::recording::buffer::Batch;
use crate::sink::{Ack, Sink};
use crate::utils::errors::SinkError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
enum FailureScript {
    Never,
    First(u64, SinkError),
    Always(SinkError),
}

/// Sink that stores batches in a vector
pub struct MemorySink {
    batches: Mutex<Vec<Batch>>,
    attempts: AtomicU64,
    script: FailureScript,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            attempts: AtomicU64::new(0),
            script: FailureScript::Never,
        }
    }

    /// Fail the first `count` writes with `error`, then succeed
    pub fn failing_first(count: u64, error: SinkError) -> Self {
        Self {
            script: FailureScript::First(count, error),
            ..Self::new()
        }
    }

    /// Fail every write with `error`
    pub fn always_failing(error: SinkError) -> Self {
        Self {
            script: FailureScript::Always(error),
            ..Self::new()
        }
    }

    /// Batches written so far, in delivery order
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Every delivered event, flattened
    pub fn events(&self) -> Vec<Event> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.events().iter().cloned())
            .collect()
    }

    /// Number of `write` calls, successful or not
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, batch: &Batch) -> Result<Ack, SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.script {
            FailureScript::First(count, error) if attempt <= *count => return Err(error.clone()),
            FailureScript::Always(error) => return Err(error.clone()),
            _ => {}
        }

        debug!("Memory sink stored batch #{} ({} events)", batch.sequence(), batch.len());
        self.batches.lock().push(batch.clone());
        Ok(Ack {
            accepted: batch.len(),
        })
    }
}
