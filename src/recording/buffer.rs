// src/recording/buffer.rs
//! Event buffer and batcher
//!
//! Accepted events accumulate in arrival order. A flush swaps the whole
//! buffer out under one lock, so concurrent enqueues land either in the
//! outgoing batch or in the fresh buffer, never both and never neither.

use crate::capture::event::Event;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ordered set of events removed from the buffer for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    sequence: u64,
    events: Vec<Event>,
}

impl Batch {
    pub(crate) fn new(sequence: u64, events: Vec<Event>) -> Self {
        Self { sequence, events }
    }

    /// Monotonic flush number, unique per buffer
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Buffer counters
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Events appended by `enqueue`
    pub enqueued: u64,

    /// Non-empty batches handed out
    pub batches: u64,

    /// Events handed back by `requeue`
    pub requeued: u64,

    /// Events currently buffered
    pub current_size: usize,

    /// Size threshold
    pub capacity: usize,
}

/// Size-triggered batching buffer
pub struct EventBuffer {
    events: Mutex<Vec<Event>>,
    capacity: usize,
    sequence: AtomicU64,
    enqueued: AtomicU64,
    batches: AtomicU64,
    requeued: AtomicU64,
}

impl EventBuffer {
    /// Create a buffer that yields a batch once `capacity` events are held
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            sequence: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
        }
    }

    /// Append an event; returns the full batch when the size threshold is reached
    pub fn enqueue(&self, event: Event) -> Option<Batch> {
        let mut events = self.events.lock();
        events.push(event);
        self.enqueued.fetch_add(1, Ordering::Relaxed);

        if events.len() >= self.capacity {
            let taken = std::mem::replace(&mut *events, Vec::with_capacity(self.capacity));
            drop(events);
            Some(self.seal(taken))
        } else {
            None
        }
    }

    /// Atomically drain the buffer; the batch is empty when nothing was buffered
    pub fn flush_now(&self) -> Batch {
        let taken = std::mem::take(&mut *self.events.lock());
        if taken.is_empty() {
            return Batch::new(self.sequence.load(Ordering::Relaxed), taken);
        }
        self.seal(taken)
    }

    /// Put a batch back at the front, ahead of anything enqueued since
    pub fn requeue(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let mut returned = batch.into_events();
        self.requeued.fetch_add(returned.len() as u64, Ordering::Relaxed);

        let mut events = self.events.lock();
        returned.append(&mut events);
        *events = returned;
    }

    pub fn peek_size(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peek_size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            current_size: self.peek_size(),
            capacity: self.capacity,
        }
    }

    fn seal(&self, events: Vec<Event>) -> Batch {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Batch::new(sequence, events)
    }
}
