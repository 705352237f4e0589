// src/query/history.rs
//! Retained event history
//!
//! Readers take cheap `Arc` snapshots; a write clones the backing vector only
//! while an older snapshot is still alive.

use crate::capture::event::Event;
use crate::query::search::{SearchCriteria, SearchResults};
use crate::query::stats::EventStats;
use parking_lot::RwLock;
use std::sync::Arc;

/// Accepted events in capture order
#[derive(Default)]
pub struct EventHistory {
    events: RwLock<Arc<Vec<Event>>>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        let mut events = self.events.write();
        Arc::make_mut(&mut events).push(event);
    }

    /// Immutable view of everything recorded so far
    pub fn snapshot(&self) -> Arc<Vec<Event>> {
        Arc::clone(&self.events.read())
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self, recent_limit: usize) -> EventStats {
        EventStats::collect(&self.snapshot(), recent_limit)
    }

    pub fn search(&self, criteria: SearchCriteria) -> SearchResults {
        SearchResults::new(self.snapshot(), criteria)
    }
}
