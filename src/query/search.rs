// src/query/search.rs
//! Conjunctive search over a history snapshot

use crate::capture::event::{Event, EventKind, Severity, Status};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Search filters; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub kind: Option<EventKind>,
    pub actor_id: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of action, entity, actor and payload
    pub text: Option<String>,
}

impl SearchCriteria {
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into().to_lowercase());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kind.map_or(true, |kind| event.kind() == kind)
            && self
                .actor_id
                .as_deref()
                .map_or(true, |actor| event.actor_id() == Some(actor))
            && self.severity.map_or(true, |s| event.severity() == Some(s))
            && self.status.map_or(true, |s| event.status() == Some(s))
            && self.from.map_or(true, |from| event.timestamp() >= from)
            && self.to.map_or(true, |to| event.timestamp() <= to)
            && self
                .text
                .as_deref()
                .map_or(true, |text| event.searchable_text().contains(&text.to_lowercase()))
    }
}

/// Matches over a fixed snapshot
///
/// Later captures are not visible; `iter()` can be called any number of
/// times and always yields the same events.
#[derive(Debug, Clone)]
pub struct SearchResults {
    snapshot: Arc<Vec<Event>>,
    criteria: SearchCriteria,
}

impl SearchResults {
    pub fn new(snapshot: Arc<Vec<Event>>, criteria: SearchCriteria) -> Self {
        Self { snapshot, criteria }
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.snapshot.iter().filter(|event| self.criteria.matches(event))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<Event> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::event::test_support::event_from;
    use crate::capture::event::{ActivityCategory, Occurrence, TelemetryKind};
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn snapshot() -> Arc<Vec<Event>> {
        Arc::new(vec![
            event_from(
                Occurrence::activity(ActivityCategory::Data, "project_create")
                    .with_actor("admin")
                    .with_entity("project:1")
                    .with_field("title", "Rust Telemetry")
                    .at(at(9)),
            ),
            event_from(
                Occurrence::activity(ActivityCategory::Auth, "login")
                    .with_actor("guest")
                    .with_status(Status::Failure)
                    .at(at(10)),
            ),
            event_from(Occurrence::telemetry(TelemetryKind::PageView, "view").at(at(11))),
            event_from(
                Occurrence::activity(ActivityCategory::Data, "project_delete")
                    .with_actor("admin")
                    .with_severity(Severity::High)
                    .at(at(12)),
            ),
        ])
    }

    fn actions(results: &SearchResults) -> Vec<&str> {
        results.iter().map(|e| e.action()).collect()
    }

    #[test]
    fn test_empty_criteria_match_all() {
        let results = SearchResults::new(snapshot(), SearchCriteria::default());
        assert_eq!(results.count(), 4);
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let criteria = SearchCriteria::default()
            .kind(EventKind::Activity(ActivityCategory::Data))
            .actor("admin")
            .severity(Severity::High);
        let results = SearchResults::new(snapshot(), criteria);
        assert_eq!(actions(&results), vec!["project_delete"]);
    }

    #[test]
    fn test_status_filter() {
        let results = SearchResults::new(snapshot(), SearchCriteria::default().status(Status::Failure));
        assert_eq!(actions(&results), vec!["login"]);
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let results = SearchResults::new(snapshot(), SearchCriteria::default().between(at(10), at(11)));
        assert_eq!(actions(&results), vec!["login", "view"]);

        let results = SearchResults::new(
            snapshot(),
            SearchCriteria::default().since(at(12) + Duration::seconds(1)),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_text_is_case_insensitive_over_payload() {
        let results = SearchResults::new(snapshot(), SearchCriteria::default().text("TELEMETRY"));
        assert_eq!(actions(&results), vec!["project_create"]);

        let mut criteria = SearchCriteria::default();
        criteria.text = Some("Project_".to_string());
        assert_eq!(SearchResults::new(snapshot(), criteria).count(), 2);
    }

    #[test]
    fn test_iteration_restarts() {
        let results = SearchResults::new(snapshot(), SearchCriteria::default().actor("admin"));
        let first: Vec<_> = results.iter().map(|e| e.id().clone()).collect();
        let second: Vec<_> = results.iter().map(|e| e.id().clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
