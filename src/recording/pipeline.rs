// src/recording/pipeline.rs
//! Capture-to-delivery pipeline
//!
//! Owns the filter, the buffer, the retained history and, while running,
//! the flush timer and in-flight deliveries. The producer side (`capture`,
//! `enqueue`) is synchronous and never awaits; flushing hands batches to
//! delivery tasks on the runtime captured by `start()`.

use crate::capture::event::{Event, Occurrence};
use crate::capture::filter::{DropReason, EventFilter, FilterRule, Verdict};
use crate::capture::session::{SessionId, SessionManager};
use crate::query::history::EventHistory;
use crate::query::search::{SearchCriteria, SearchResults};
use crate::query::stats::EventStats;
use crate::recording::buffer::{Batch, EventBuffer};
use crate::recording::dispatcher::{
    DeliveryCallbacks, DeliveryCounters, DeliveryOutcome, DeliveryStats, RetryPolicy,
    SinkDispatcher,
};
use crate::sink::Sink;
use crate::utils::errors::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Events per size-triggered batch
    pub buffer_size: usize,

    /// Timer flush period in milliseconds; 0 disables the timer
    pub flush_interval_ms: u64,

    /// Total delivery attempts per batch
    pub max_retries: u32,

    /// Backoff unit in milliseconds; attempt `n` waits `n` units
    pub base_retry_delay_ms: u64,

    /// Size of the "most recent" slice in stats
    pub recent_limit: usize,

    /// Keep accepted events for stats and search
    pub retain_history: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 50,
            flush_interval_ms: 5_000,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            recent_limit: 10,
            retain_history: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(TelemetryError::ConfigError(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
        }
    }
}

/// Capture-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped: u64,
    pub invalid: u64,
}

#[derive(Default)]
struct CaptureCounters {
    captured: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
}

/// Snapshot of all pipeline counters
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub capture: CaptureStats,
    pub buffered: usize,
    pub delivery: DeliveryStats,
}

/// Hands batches to tracked delivery tasks
#[derive(Clone)]
struct Flusher {
    runtime: Handle,
    buffer: Arc<EventBuffer>,
    dispatcher: Arc<SinkDispatcher>,
    tasks: TaskTracker,
}

impl Flusher {
    fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        debug!("Flushing batch #{} ({} events)", batch.sequence(), batch.len());

        let buffer = Arc::clone(&self.buffer);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.tasks.spawn_on(
            async move {
                if let DeliveryOutcome::Interrupted(batch) = dispatcher.deliver(batch).await {
                    buffer.requeue(batch);
                }
            },
            &self.runtime,
        );
    }
}

struct Running {
    flusher: Flusher,
    cancel: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

/// Event capture and batched delivery pipeline
pub struct Pipeline {
    config: PipelineConfig,
    filter: EventFilter,
    sessions: Arc<SessionManager>,
    buffer: Arc<EventBuffer>,
    history: Arc<EventHistory>,
    sink: Arc<dyn Sink>,
    callbacks: DeliveryCallbacks,
    counters: CaptureCounters,
    delivery: Arc<DeliveryCounters>,
    running: Option<Running>,
}

impl Pipeline {
    /// Create a stopped pipeline
    pub fn new(config: PipelineConfig, rule: FilterRule, sink: Arc<dyn Sink>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            buffer: Arc::new(EventBuffer::new(config.buffer_size)),
            history: Arc::new(EventHistory::new()),
            filter: EventFilter::new(rule),
            sessions: SessionManager::global(),
            sink,
            callbacks: DeliveryCallbacks::default(),
            counters: CaptureCounters::default(),
            delivery: Arc::new(DeliveryCounters::default()),
            running: None,
            config,
        })
    }

    /// Observe delivery outcomes; takes effect on the next `start()`
    pub fn with_callbacks(mut self, callbacks: DeliveryCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Use a dedicated session manager instead of the process-wide one
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn session_id(&self) -> SessionId {
        self.sessions.current_session()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the flush timer; must be called from within a tokio runtime
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }
        let runtime = Handle::try_current()
            .map_err(|e| TelemetryError::ConfigError(format!("No tokio runtime: {}", e)))?;

        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(SinkDispatcher::new(
            Arc::clone(&self.sink),
            self.config.retry_policy(),
            self.callbacks.clone(),
            cancel.clone(),
        )
        .with_counters(Arc::clone(&self.delivery)));
        let flusher = Flusher {
            runtime: runtime.clone(),
            buffer: Arc::clone(&self.buffer),
            dispatcher: Arc::clone(&dispatcher),
            tasks: TaskTracker::new(),
        };

        let timer = self.config.flush_interval().map(|period| {
            let flusher = flusher.clone();
            let cancel = cancel.clone();
            runtime.spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately
                interval.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            flusher.dispatch(flusher.buffer.flush_now());
                        }
                    }
                }
            })
        });

        info!(
            "Telemetry pipeline started (sink: {}, buffer_size: {}, flush_interval: {:?})",
            self.sink.name(),
            self.config.buffer_size,
            self.config.flush_interval()
        );

        self.running = Some(Running {
            flusher,
            cancel,
            timer,
        });

        // Anything captured before start is flushed on the size trigger or the next tick
        if self.buffer.peek_size() >= self.buffer.capacity() {
            self.flush_now();
        }
        Ok(())
    }

    /// Filter, retain and enqueue one occurrence; returns the accepted event
    ///
    /// Never fails the caller: invalid or filtered occurrences are counted
    /// and dropped.
    pub fn capture(&self, occurrence: Occurrence) -> Option<Event> {
        let session = self.sessions.current_session();
        match self.filter.accept(occurrence, &session) {
            Ok(Verdict::Accepted(event)) => {
                self.counters.captured.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("telemetry_events_captured_total").increment(1);
                if self.config.retain_history {
                    self.history.record(event.clone());
                }
                self.enqueue(event.clone());
                Some(event)
            }
            Ok(Verdict::Dropped(reason)) => {
                self.record_drop(&reason);
                None
            }
            Err(e) => {
                debug!("Dropping invalid occurrence: {}", e);
                self.counters.invalid.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("telemetry_events_dropped_total", "reason" => "invalid").increment(1);
                None
            }
        }
    }

    /// Append an already filtered event; flushes when the buffer is full
    pub fn enqueue(&self, event: Event) {
        if let Some(batch) = self.buffer.enqueue(event) {
            self.dispatch(batch);
        }
    }

    /// Flush whatever is buffered; returns the number of events handed off
    pub fn flush_now(&self) -> usize {
        let batch = self.buffer.flush_now();
        let count = batch.len();
        self.dispatch(batch);
        count
    }

    pub fn peek_size(&self) -> usize {
        self.buffer.peek_size()
    }

    /// Cancel the timer and pending retries, then deliver what is left once
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(TelemetryError::NotRunning)?;

        running.cancel.cancel();
        // Join the timer first so no tick can dispatch past the tracker
        if let Some(timer) = running.timer {
            if let Err(e) = timer.await {
                warn!("Flush timer ended abnormally: {}", e);
            }
        }
        running.flusher.tasks.close();
        running.flusher.tasks.wait().await;

        let batch = self.buffer.flush_now();
        if !batch.is_empty() {
            info!("Final flush of {} events", batch.len());
            running.flusher.dispatcher.deliver_once(batch).await;
        }

        info!("Telemetry pipeline stopped");
        Ok(())
    }

    pub fn stats(&self) -> EventStats {
        self.history.stats(self.config.recent_limit)
    }

    pub fn search(&self, criteria: SearchCriteria) -> SearchResults {
        self.history.search(criteria)
    }

    pub fn history(&self) -> &Arc<EventHistory> {
        &self.history
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        PipelineStats {
            capture: CaptureStats {
                captured: self.counters.captured.load(Ordering::Relaxed),
                dropped: self.counters.dropped.load(Ordering::Relaxed),
                invalid: self.counters.invalid.load(Ordering::Relaxed),
            },
            buffered: self.buffer.peek_size(),
            delivery: self.delivery.snapshot(),
        }
    }

    fn dispatch(&self, batch: Batch) {
        match &self.running {
            Some(running) => running.flusher.dispatch(batch),
            None => {
                debug!("Pipeline not running; keeping {} events buffered", batch.len());
                self.buffer.requeue(batch);
            }
        }
    }

    fn record_drop(&self, reason: &DropReason) {
        debug!("Occurrence dropped: {:?}", reason);
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("telemetry_events_dropped_total", "reason" => reason.label()).increment(1);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            warn!(
                "Pipeline dropped while running; {} buffered events not flushed",
                self.buffer.peek_size()
            );
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::event::{ActivityCategory, TelemetryKind};
    use crate::sink::MemorySink;
    use crate::utils::config::FilterConfig;
    use crate::utils::errors::SinkError;
    use parking_lot::Mutex;

    fn config(buffer_size: usize, flush_interval_ms: u64) -> PipelineConfig {
        PipelineConfig {
            buffer_size,
            flush_interval_ms,
            base_retry_delay_ms: 100,
            ..Default::default()
        }
    }

    fn pipeline(config: PipelineConfig, sink: Arc<MemorySink>) -> Pipeline {
        Pipeline::new(config, FilterRule::allow_all(), sink)
            .unwrap()
            .with_session_manager(Arc::new(SessionManager::new()))
    }

    fn view(page: &str) -> Occurrence {
        Occurrence::telemetry(TelemetryKind::PageView, "view").with_target(page)
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_rejects_zero_buffer_size() {
        let result = Pipeline::new(config(0, 0), FilterRule::allow_all(), Arc::new(MemorySink::new()));
        assert!(matches!(result, Err(TelemetryError::ConfigError(_))));
    }

    #[test]
    fn test_start_requires_runtime() {
        let mut p = pipeline(config(10, 0), Arc::new(MemorySink::new()));
        assert!(p.start().is_err());
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let mut p = pipeline(config(10, 0), Arc::new(MemorySink::new()));
        p.start().unwrap();
        assert!(matches!(p.start(), Err(TelemetryError::AlreadyRunning)));
        p.stop().await.unwrap();
        assert!(matches!(p.stop().await, Err(TelemetryError::NotRunning)));
    }

    #[tokio::test]
    async fn test_size_trigger_delivers_in_order() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(3, 0), sink.clone());
        p.start().unwrap();

        for page in ["/", "/projects", "/skills"] {
            p.capture(view(page));
        }
        settle().await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let targets: Vec<_> = batches[0].events().iter().filter_map(|e| e.target()).collect();
        assert_eq!(targets, vec!["/", "/projects", "/skills"]);
        assert_eq!(p.peek_size(), 0);
        p.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_buffer() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(100, 50), sink.clone());
        p.start().unwrap();

        p.capture(view("/"));
        p.capture(view("/about"));
        settle().await;
        assert!(sink.batches().is_empty());

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.batches()[0].len(), 2);
        p.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_ticks_deliver_nothing() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(100, 50), sink.clone());
        p.start().unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        assert_eq!(sink.attempts(), 0);
        p.stop().await.unwrap();
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_performs_single_final_flush() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(100, 50), sink.clone());
        p.start().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        for i in 0..5 {
            p.capture(view(&format!("/p/{}", i)));
        }
        p.stop().await.unwrap();

        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.batches()[0].len(), 5);

        tokio::time::sleep(Duration::from_millis(500)).await;
        p.capture(view("/late"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(p.peek_size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_recovers_batch_stuck_in_backoff() {
        let sink = Arc::new(MemorySink::failing_first(1, SinkError::Unavailable("offline".into())));
        let mut p = pipeline(
            PipelineConfig {
                base_retry_delay_ms: 10_000,
                ..config(2, 0)
            },
            sink.clone(),
        );
        p.start().unwrap();

        p.capture(view("/a"));
        p.capture(view("/b"));
        settle().await;
        assert_eq!(sink.attempts(), 1);

        p.capture(view("/c"));
        p.stop().await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let targets: Vec<_> = batches[0].events().iter().filter_map(|e| e.target()).collect();
        assert_eq!(targets, vec!["/a", "/b", "/c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_batch_does_not_block_later_batches() {
        let sink = Arc::new(MemorySink::failing_first(3, SinkError::Unavailable("offline".into())));
        let errors = Arc::new(Mutex::new(0usize));
        let counted = Arc::clone(&errors);
        let mut p = pipeline(config(2, 0), sink.clone()).with_callbacks(
            DeliveryCallbacks::default().on_error(move |_, _| *counted.lock() += 1),
        );
        p.start().unwrap();

        p.capture(view("/a"));
        p.capture(view("/b"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(*errors.lock(), 1);

        p.capture(view("/c"));
        p.capture(view("/d"));
        settle().await;

        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.events().len(), 2);
        let stats = p.pipeline_stats();
        assert_eq!(stats.delivery.batches_dropped, 1);
        assert_eq!(stats.delivery.batches_delivered, 1);
        p.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_due_at_stop_leaves_single_final_flush() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(100, 10), sink.clone());
        p.start().unwrap();
        settle().await;

        for i in 0..5 {
            p.capture(view(&format!("/p/{}", i)));
        }
        // Block the runtime thread past the tick deadline
        std::thread::sleep(Duration::from_millis(30));
        p.stop().await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(p.peek_size(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_restart_keeps_delivery_counters() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(10, 0), sink.clone());

        for page in ["/first", "/second"] {
            p.start().unwrap();
            p.capture(view(page));
            p.stop().await.unwrap();
        }

        let delivery = p.pipeline_stats().delivery;
        assert_eq!(delivery.batches_delivered, 2);
        assert_eq!(delivery.events_delivered, 2);
        assert_eq!(sink.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_capture_before_start_is_buffered() {
        let sink = Arc::new(MemorySink::new());
        let mut p = pipeline(config(2, 0), sink.clone());

        p.capture(view("/a"));
        p.capture(view("/b"));
        p.capture(view("/c"));
        assert_eq!(p.peek_size(), 3);
        assert!(sink.batches().is_empty());

        p.start().unwrap();
        settle().await;
        assert_eq!(sink.events().len(), 3);
        p.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_filtered_and_invalid_are_counted() {
        let rule = FilterRule::from_config(&FilterConfig {
            excluded_actions: vec!["password_change".to_string()],
            ..Default::default()
        })
        .unwrap();
        let p = Pipeline::new(config(10, 0), rule, Arc::new(MemorySink::new())).unwrap();

        assert!(p
            .capture(Occurrence::activity(ActivityCategory::Security, "password_change"))
            .is_none());
        assert!(p.capture(Occurrence::telemetry(TelemetryKind::Custom, "")).is_none());
        let event = p
            .capture(Occurrence::activity(ActivityCategory::Data, "skill_create"))
            .unwrap();

        let stats = p.pipeline_stats();
        assert_eq!(stats.capture, CaptureStats { captured: 1, dropped: 1, invalid: 1 });
        assert_eq!(stats.buffered, 1);
        assert_eq!(p.stats().total, 1);
        assert_eq!(p.search(SearchCriteria::default()).to_vec(), vec![event]);
    }

    #[tokio::test]
    async fn test_history_can_be_disabled() {
        let p = Pipeline::new(
            PipelineConfig {
                retain_history: false,
                ..config(10, 0)
            },
            FilterRule::allow_all(),
            Arc::new(MemorySink::new()),
        )
        .unwrap();

        p.capture(view("/"));
        assert_eq!(p.stats().total, 0);
        assert_eq!(p.peek_size(), 1);
    }
}
