// src/recording/dispatcher.rs
//! Sink dispatcher with retry/backoff
//!
//! Each batch is owned by exactly one `deliver` call. Retryable failures
//! wait `base_delay * attempt` and resubmit the same batch; terminal
//! failures and exhausted retries drop it and fire the error callback once.
//! Backoff waits are cancellable: an interrupted batch is handed back to the
//! caller instead of being dropped.

use crate::recording::buffer::Batch;
use crate::sink::Sink;
use crate::utils::errors::SinkError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub type SuccessCallback = Arc<dyn Fn(&Batch) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Batch, &SinkError) + Send + Sync>;

/// Optional observers of delivery outcomes
#[derive(Clone, Default)]
pub struct DeliveryCallbacks {
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl DeliveryCallbacks {
    pub fn on_success(mut self, callback: impl Fn(&Batch) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&Batch, &SinkError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for DeliveryCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Retry settings for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts per batch; 0 behaves like 1
    pub max_retries: u32,

    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait before the attempt following failed attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Result of delivering one batch
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32, error: SinkError },
    /// Cancelled during backoff; the caller owns the batch again
    Interrupted(Batch),
}

/// Delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub attempts: u64,
    pub retries: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
    pub batches_interrupted: u64,
}

/// Live delivery counters; one set can outlive several dispatchers
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    attempts: AtomicU64,
    retries: AtomicU64,
    batches_delivered: AtomicU64,
    events_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    events_dropped: AtomicU64,
    batches_interrupted: AtomicU64,
}

impl DeliveryCounters {
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_interrupted: self.batches_interrupted.load(Ordering::Relaxed),
        }
    }
}

/// Delivers batches to a sink
pub struct SinkDispatcher {
    sink: Arc<dyn Sink>,
    retry: RetryPolicy,
    callbacks: DeliveryCallbacks,
    cancel: CancellationToken,
    counters: Arc<DeliveryCounters>,
}

impl SinkDispatcher {
    pub fn new(
        sink: Arc<dyn Sink>,
        retry: RetryPolicy,
        callbacks: DeliveryCallbacks,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            retry,
            callbacks,
            cancel,
            counters: Arc::new(DeliveryCounters::default()),
        }
    }

    /// Accumulate into existing counters instead of fresh ones
    pub fn with_counters(mut self, counters: Arc<DeliveryCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Deliver with retry/backoff
    pub async fn deliver(&self, batch: Batch) -> DeliveryOutcome {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(&batch).await {
                Ok(()) => {
                    self.delivered(&batch, attempt);
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(err) if !err.is_retryable() || attempt >= max_attempts => {
                    self.dropped(&batch, &err, attempt);
                    return DeliveryOutcome::Dropped {
                        attempts: attempt,
                        error: err,
                    };
                }
                Err(err) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Delivery of batch #{} to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        batch.sequence(),
                        self.sink.name(),
                        attempt,
                        max_attempts,
                        err,
                        delay
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("telemetry_delivery_retries_total").increment(1);

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            debug!("Backoff for batch #{} interrupted", batch.sequence());
                            self.counters.batches_interrupted.fetch_add(1, Ordering::Relaxed);
                            return DeliveryOutcome::Interrupted(batch);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Single attempt without retry, used for the final flush on shutdown
    pub async fn deliver_once(&self, batch: Batch) -> DeliveryOutcome {
        match self.attempt(&batch).await {
            Ok(()) => {
                self.delivered(&batch, 1);
                DeliveryOutcome::Delivered { attempts: 1 }
            }
            Err(err) => {
                self.dropped(&batch, &err, 1);
                DeliveryOutcome::Dropped {
                    attempts: 1,
                    error: err,
                }
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    async fn attempt(&self, batch: &Batch) -> Result<(), SinkError> {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        self.sink.write(batch).await.map(|ack| {
            if ack.accepted != batch.len() {
                debug!(
                    "{} acknowledged {} of {} events in batch #{}",
                    self.sink.name(),
                    ack.accepted,
                    batch.len(),
                    batch.sequence()
                );
            }
        })
    }

    fn delivered(&self, batch: &Batch, attempts: u32) {
        debug!(
            "Delivered batch #{} ({} events) to {} after {} attempt(s)",
            batch.sequence(),
            batch.len(),
            self.sink.name(),
            attempts
        );
        self.counters.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.counters
            .events_delivered
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        metrics::counter!("telemetry_batches_delivered_total").increment(1);
        metrics::counter!("telemetry_events_delivered_total").increment(batch.len() as u64);

        if let Some(callback) = &self.callbacks.on_success {
            callback(batch);
        }
    }

    fn dropped(&self, batch: &Batch, err: &SinkError, attempts: u32) {
        error!(
            "Dropping batch #{} ({} events) after {} attempt(s) to {}: {}",
            batch.sequence(),
            batch.len(),
            attempts,
            self.sink.name(),
            err
        );
        self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.counters
            .events_dropped
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        metrics::counter!("telemetry_batches_dropped_total", "reason" => err.label()).increment(1);

        if let Some(callback) = &self.callbacks.on_error {
            callback(batch, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::event::test_support::event;
    use crate::capture::event::{EventKind, TelemetryKind};
    use crate::sink::MemorySink;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    fn batch(n: usize) -> Batch {
        Batch::new(
            1,
            (0..n)
                .map(|i| event(EventKind::Telemetry(TelemetryKind::Scroll), &format!("scroll_{}", i)))
                .collect(),
        )
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    struct Recorder {
        delivered: Mutex<Vec<Batch>>,
        errors: Mutex<Vec<SinkError>>,
    }

    fn recording_callbacks() -> (DeliveryCallbacks, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            delivered: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        });
        let ok = Arc::clone(&recorder);
        let failed = Arc::clone(&recorder);
        let callbacks = DeliveryCallbacks::default()
            .on_success(move |b| ok.delivered.lock().push(b.clone()))
            .on_error(move |_, e| failed.errors.lock().push(e.clone()));
        (callbacks, recorder)
    }

    #[test]
    fn test_backoff_grows_with_attempt() {
        let p = policy(5);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_delivers_first_time() {
        let sink = Arc::new(MemorySink::new());
        let (callbacks, recorder) = recording_callbacks();
        let dispatcher = SinkDispatcher::new(sink.clone(), policy(3), callbacks, CancellationToken::new());

        let outcome = dispatcher.deliver(batch(2)).await;

        assert!(matches!(outcome, DeliveryOutcome::Delivered { attempts: 1 }));
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(recorder.delivered.lock().len(), 1);
        assert_eq!(dispatcher.stats().events_delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt_with_unmodified_batch() {
        let sink = Arc::new(MemorySink::failing_first(2, SinkError::Unavailable("offline".into())));
        let (callbacks, recorder) = recording_callbacks();
        let dispatcher = SinkDispatcher::new(sink.clone(), policy(3), callbacks, CancellationToken::new());

        let original = batch(4);
        let started = Instant::now();
        let outcome = dispatcher.deliver(original.clone()).await;

        assert!(matches!(outcome, DeliveryOutcome::Delivered { attempts: 3 }));
        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.batches(), vec![original]);
        assert!(recorder.errors.lock().is_empty());
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(dispatcher.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_drop_once() {
        let sink = Arc::new(MemorySink::always_failing(SinkError::Unavailable("offline".into())));
        let (callbacks, recorder) = recording_callbacks();
        let dispatcher = SinkDispatcher::new(sink.clone(), policy(3), callbacks, CancellationToken::new());

        let outcome = dispatcher.deliver(batch(2)).await;

        assert!(matches!(outcome, DeliveryOutcome::Dropped { attempts: 3, .. }));
        assert_eq!(sink.attempts(), 3);
        assert_eq!(recorder.errors.lock().len(), 1);
        assert_eq!(dispatcher.stats().batches_dropped, 1);
        assert_eq!(dispatcher.stats().events_dropped, 2);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        for error in [
            SinkError::Permission("read-only".into()),
            SinkError::Serialization("bad payload".into()),
        ] {
            let sink = Arc::new(MemorySink::always_failing(error.clone()));
            let (callbacks, recorder) = recording_callbacks();
            let dispatcher = SinkDispatcher::new(sink.clone(), policy(5), callbacks, CancellationToken::new());

            let outcome = dispatcher.deliver(batch(1)).await;

            assert!(matches!(outcome, DeliveryOutcome::Dropped { attempts: 1, .. }));
            assert_eq!(sink.attempts(), 1);
            assert_eq!(*recorder.errors.lock(), vec![error]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let sink = Arc::new(MemorySink::always_failing(SinkError::Unavailable("offline".into())));
        let cancel = CancellationToken::new();
        let (callbacks, recorder) = recording_callbacks();
        let dispatcher = Arc::new(SinkDispatcher::new(sink.clone(), policy(10), callbacks, cancel.clone()));

        let original = batch(3);
        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            let original = original.clone();
            tokio::spawn(async move { dispatcher.deliver(original).await })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();

        match task.await.unwrap() {
            DeliveryOutcome::Interrupted(returned) => assert_eq!(returned, original),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(sink.attempts(), 2);
        assert!(recorder.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shared_counters_accumulate_across_dispatchers() {
        let sink = Arc::new(MemorySink::new());
        let counters = Arc::new(DeliveryCounters::default());

        for _ in 0..2 {
            let dispatcher = SinkDispatcher::new(
                sink.clone(),
                policy(3),
                DeliveryCallbacks::default(),
                CancellationToken::new(),
            )
            .with_counters(Arc::clone(&counters));
            dispatcher.deliver(batch(2)).await;
        }

        assert_eq!(counters.snapshot().batches_delivered, 2);
        assert_eq!(counters.snapshot().events_delivered, 4);
    }

    #[tokio::test]
    async fn test_deliver_once_does_not_retry() {
        let sink = Arc::new(MemorySink::always_failing(SinkError::Unavailable("offline".into())));
        let (callbacks, recorder) = recording_callbacks();
        let dispatcher = SinkDispatcher::new(sink.clone(), policy(3), callbacks, CancellationToken::new());

        let outcome = dispatcher.deliver_once(batch(1)).await;

        assert!(matches!(outcome, DeliveryOutcome::Dropped { attempts: 1, .. }));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(recorder.errors.lock().len(), 1);
    }
}
