// src/capture/event.rs
//! Event model
//!
//! An [`Occurrence`] is the raw happening reported by the host UI. Once it
//! passes the filter it becomes an [`Event`]: immutable, uniquely identified
//! and already redacted.

use crate::capture::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Process-unique event identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub(crate) fn generate() -> Self {
        Self(format!("evt_{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Telemetry tag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TelemetryKind {
    Interaction,
    Scroll,
    PageView,
    FormSubmit,
    Custom,
}

/// Activity-log categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityCategory {
    Auth,
    Data,
    Config,
    Security,
    System,
}

impl ActivityCategory {
    /// Severity assumed when an activity does not carry one
    pub fn default_severity(self) -> Severity {
        match self {
            ActivityCategory::Auth => Severity::Medium,
            ActivityCategory::Data => Severity::Low,
            ActivityCategory::Config => Severity::Medium,
            ActivityCategory::Security => Severity::High,
            ActivityCategory::System => Severity::Low,
        }
    }
}

/// Closed tag set covering both the telemetry and the activity-log variant
///
/// Serialized as a flat snake_case label (`"page_view"`, `"security"`); the
/// labels are unique across both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventKind {
    Telemetry(TelemetryKind),
    Activity(ActivityCategory),
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Telemetry(TelemetryKind::Interaction),
        EventKind::Telemetry(TelemetryKind::Scroll),
        EventKind::Telemetry(TelemetryKind::PageView),
        EventKind::Telemetry(TelemetryKind::FormSubmit),
        EventKind::Telemetry(TelemetryKind::Custom),
        EventKind::Activity(ActivityCategory::Auth),
        EventKind::Activity(ActivityCategory::Data),
        EventKind::Activity(ActivityCategory::Config),
        EventKind::Activity(ActivityCategory::Security),
        EventKind::Activity(ActivityCategory::System),
    ];

    pub fn label(self) -> &'static str {
        match self {
            EventKind::Telemetry(TelemetryKind::Interaction) => "interaction",
            EventKind::Telemetry(TelemetryKind::Scroll) => "scroll",
            EventKind::Telemetry(TelemetryKind::PageView) => "page_view",
            EventKind::Telemetry(TelemetryKind::FormSubmit) => "form_submit",
            EventKind::Telemetry(TelemetryKind::Custom) => "custom",
            EventKind::Activity(ActivityCategory::Auth) => "auth",
            EventKind::Activity(ActivityCategory::Data) => "data",
            EventKind::Activity(ActivityCategory::Config) => "config",
            EventKind::Activity(ActivityCategory::Security) => "security",
            EventKind::Activity(ActivityCategory::System) => "system",
        }
    }

    pub fn is_activity(self) -> bool {
        matches!(self, EventKind::Activity(_))
    }

    pub fn category(self) -> Option<ActivityCategory> {
        match self {
            EventKind::Activity(category) => Some(category),
            EventKind::Telemetry(_) => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.label() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.label().to_string()
    }
}

/// Activity severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

/// Activity outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
    Partial,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Partial => "partial",
        }
    }
}

/// Raw, unfiltered happening observed by the capture layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub kind: EventKind,

    pub action: String,

    /// UI selector or element the occurrence happened on
    #[serde(default)]
    pub target: Option<String>,

    /// Domain entity acted upon
    #[serde(default)]
    pub entity: Option<String>,

    #[serde(default)]
    pub actor_id: Option<String>,

    #[serde(default)]
    pub severity: Option<Severity>,

    #[serde(default)]
    pub status: Option<Status>,

    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Before/after data for activity entries
    #[serde(default)]
    pub changes: Option<Value>,

    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Capture time; `None` means "now"
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Occurrence {
    pub fn new(kind: EventKind, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            target: None,
            entity: None,
            actor_id: None,
            severity: None,
            status: None,
            duration_ms: None,
            changes: None,
            payload: Map::new(),
            timestamp: None,
        }
    }

    pub fn telemetry(kind: TelemetryKind, action: impl Into<String>) -> Self {
        Self::new(EventKind::Telemetry(kind), action)
    }

    pub fn activity(category: ActivityCategory, action: impl Into<String>) -> Self {
        Self::new(EventKind::Activity(category), action)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_changes(mut self, changes: Value) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One captured, filtered and redacted occurrence
///
/// Fields are private: an event cannot change once the filter has built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: EventId,
    kind: EventKind,
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<String>,
    timestamp: DateTime<Utc>,
    session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor_id: Option<String>,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
}

impl Event {
    /// Build an event from an already validated and redacted occurrence
    pub(crate) fn from_occurrence(
        occurrence: Occurrence,
        session_id: SessionId,
        severity: Option<Severity>,
        status: Option<Status>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            kind: occurrence.kind,
            action: occurrence.action,
            target: occurrence.target,
            entity: occurrence.entity,
            timestamp: occurrence.timestamp.unwrap_or_else(Utc::now),
            session_id,
            actor_id: occurrence.actor_id,
            payload: occurrence.payload,
            changes: occurrence.changes,
            duration_ms: occurrence.duration_ms,
            severity,
            status,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn changes(&self) -> Option<&Value> {
        self.changes.as_ref()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Lowercased text used by free-text search
    pub fn searchable_text(&self) -> String {
        let payload = serde_json::to_string(&self.payload).unwrap_or_default();
        format!(
            "{} {} {} {}",
            self.action,
            self.entity.as_deref().unwrap_or_default(),
            self.actor_id.as_deref().unwrap_or_default(),
            payload
        )
        .to_lowercase()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_labels_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.label().parse::<EventKind>().unwrap(), kind);
        }
        assert!("hover".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_flat() {
        let kind = EventKind::Telemetry(TelemetryKind::PageView);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!("page_view"));

        let parsed: EventKind = serde_json::from_value(json!("security")).unwrap();
        assert_eq!(parsed, EventKind::Activity(ActivityCategory::Security));
    }

    #[test]
    fn test_default_severity_per_category() {
        assert_eq!(ActivityCategory::Security.default_severity(), Severity::High);
        assert_eq!(ActivityCategory::Data.default_severity(), Severity::Low);
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = test_support::event(EventKind::Telemetry(TelemetryKind::Scroll), "scroll");
        let b = test_support::event(EventKind::Telemetry(TelemetryKind::Scroll), "scroll");
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("evt_"));
    }

    #[test]
    fn test_occurrence_from_json() {
        let occurrence: Occurrence = serde_json::from_value(json!({
            "kind": "data",
            "action": "project_update",
            "entity": "project:42",
            "actorId": "admin",
            "payload": {"title": "Portfolio"}
        }))
        .unwrap();

        assert_eq!(occurrence.kind, EventKind::Activity(ActivityCategory::Data));
        assert_eq!(occurrence.actor_id.as_deref(), Some("admin"));
        assert_eq!(occurrence.payload["title"], json!("Portfolio"));
        assert!(occurrence.timestamp.is_none());
    }

    #[test]
    fn test_searchable_text() {
        let event = test_support::event_from(
            Occurrence::activity(ActivityCategory::Data, "Skill_Create")
                .with_entity("skill:rust")
                .with_actor("Admin")
                .with_field("level", "Expert"),
        );
        let text = event.searchable_text();
        assert!(text.contains("skill_create"));
        assert!(text.contains("skill:rust"));
        assert!(text.contains("admin"));
        assert!(text.contains("expert"));
    }
}
