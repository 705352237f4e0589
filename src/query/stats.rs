// src/query/stats.rs
//! Aggregate statistics over retained events

use crate::capture::event::{Event, EventKind, Severity, Status};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts over a history snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub by_kind: BTreeMap<EventKind, usize>,
    /// Only events carrying a severity (activity entries)
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_status: BTreeMap<Status, usize>,
    /// Events without an actor are not counted here
    pub by_actor: BTreeMap<String, usize>,
    /// Most recently captured events, newest first
    pub recent: Vec<Event>,
}

impl EventStats {
    pub fn collect(events: &[Event], recent_limit: usize) -> Self {
        let mut stats = events.iter().fold(EventStats::default(), |mut stats, event| {
            stats.total += 1;
            *stats.by_kind.entry(event.kind()).or_default() += 1;
            if let Some(severity) = event.severity() {
                *stats.by_severity.entry(severity).or_default() += 1;
            }
            if let Some(status) = event.status() {
                *stats.by_status.entry(status).or_default() += 1;
            }
            if let Some(actor) = event.actor_id() {
                *stats.by_actor.entry(actor.to_string()).or_default() += 1;
            }
            stats
        });

        stats.recent = events.iter().rev().take(recent_limit).cloned().collect();
        stats
    }

    pub fn count_for(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Activity entries at or above `severity`
    pub fn at_least(&self, severity: Severity) -> usize {
        self.by_severity.range(severity..).map(|(_, n)| n).sum()
    }
}
