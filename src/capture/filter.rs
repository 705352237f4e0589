// src/capture/filter.rs
//! Sampling & privacy filter
//!
//! Turns an [`Occurrence`] into an [`Event`] or drops it. The decision is a
//! pure function of the rule, the occurrence and the random draw, so
//! [`EventFilter::accept_with_draw`] can be tested without any runtime.

use crate::capture::event::{ActivityCategory, Event, EventKind, Occurrence, Severity, Status};
use crate::capture::redact::Redactor;
use crate::capture::session::SessionId;
use crate::utils::config::FilterConfig;
use crate::utils::errors::{Result, TelemetryError};
use rand::Rng;
use std::collections::BTreeSet;

/// Read-only filter configuration
#[derive(Debug, Clone)]
pub struct FilterRule {
    sample_rate: f64,
    enabled_kinds: Option<BTreeSet<EventKind>>,
    excluded_selectors: Vec<String>,
    excluded_actions: Vec<String>,
    min_severity: Severity,
    redactor: Redactor,
}

impl FilterRule {
    /// Validate the configuration and compile its patterns
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.sample_rate) {
            return Err(TelemetryError::ConfigError(format!(
                "sample_rate must be within [0, 1], got {}",
                config.sample_rate
            )));
        }

        Ok(Self {
            sample_rate: config.sample_rate,
            enabled_kinds: config.enabled_kinds.clone(),
            excluded_selectors: config.excluded_selectors.clone(),
            excluded_actions: config
                .excluded_actions
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            min_severity: config.min_severity,
            redactor: Redactor::new(&config.sensitive_field_patterns)?,
        })
    }

    /// Keep everything, redact with the default patterns
    pub fn allow_all() -> Self {
        Self {
            sample_rate: 1.0,
            enabled_kinds: None,
            excluded_selectors: Vec::new(),
            excluded_actions: Vec::new(),
            min_severity: Severity::Low,
            redactor: Redactor::default(),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    fn kind_enabled(&self, kind: EventKind) -> bool {
        self.enabled_kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    }

    fn excluded_selector(&self, target: Option<&str>) -> Option<&str> {
        let target = target?;
        self.excluded_selectors
            .iter()
            .find(|selector| target.contains(selector.as_str()))
            .map(String::as_str)
    }

    fn excluded_action(&self, action: &str) -> Option<&str> {
        let action = action.to_lowercase();
        self.excluded_actions
            .iter()
            .find(|excluded| action.contains(excluded.as_str()))
            .map(String::as_str)
    }
}

/// Why an occurrence did not become an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    KindDisabled(EventKind),
    Sampled,
    ExcludedSelector(String),
    ExcludedAction(String),
    BelowMinSeverity(Severity),
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::KindDisabled(_) => "kind_disabled",
            DropReason::Sampled => "sampled",
            DropReason::ExcludedSelector(_) => "excluded_selector",
            DropReason::ExcludedAction(_) => "excluded_action",
            DropReason::BelowMinSeverity(_) => "below_min_severity",
        }
    }
}

/// Outcome of filtering one occurrence
#[derive(Debug, Clone)]
pub enum Verdict {
    Accepted(Event),
    Dropped(DropReason),
}

impl Verdict {
    pub fn into_event(self) -> Option<Event> {
        match self {
            Verdict::Accepted(event) => Some(event),
            Verdict::Dropped(_) => None,
        }
    }
}

/// Applies a [`FilterRule`] to raw occurrences
#[derive(Debug, Clone)]
pub struct EventFilter {
    rule: FilterRule,
}

impl EventFilter {
    pub fn new(rule: FilterRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &FilterRule {
        &self.rule
    }

    /// Filter with a fresh draw from the thread-local RNG
    pub fn accept(&self, occurrence: Occurrence, session: &SessionId) -> Result<Verdict> {
        let draw = rand::thread_rng().gen::<f64>();
        self.accept_with_draw(occurrence, session, draw)
    }

    /// Filter with an explicit draw in `[0, 1)`; the occurrence is dropped when
    /// `draw >= sample_rate`
    pub fn accept_with_draw(
        &self,
        mut occurrence: Occurrence,
        session: &SessionId,
        draw: f64,
    ) -> Result<Verdict> {
        validate(&occurrence)?;

        let rule = &self.rule;
        if !rule.kind_enabled(occurrence.kind) {
            return Ok(Verdict::Dropped(DropReason::KindDisabled(occurrence.kind)));
        }
        if draw >= rule.sample_rate {
            return Ok(Verdict::Dropped(DropReason::Sampled));
        }
        if let Some(selector) = rule.excluded_selector(occurrence.target.as_deref()) {
            return Ok(Verdict::Dropped(DropReason::ExcludedSelector(selector.to_string())));
        }

        let (severity, status) = match occurrence.kind.category() {
            Some(category) => {
                if let Some(excluded) = rule.excluded_action(&occurrence.action) {
                    return Ok(Verdict::Dropped(DropReason::ExcludedAction(excluded.to_string())));
                }
                let severity = resolve_severity(category, occurrence.severity);
                if severity < rule.min_severity {
                    return Ok(Verdict::Dropped(DropReason::BelowMinSeverity(severity)));
                }
                (Some(severity), Some(occurrence.status.unwrap_or(Status::Success)))
            }
            None => (None, None),
        };

        rule.redactor.redact_map(&mut occurrence.payload);
        if let Some(changes) = occurrence.changes.as_mut() {
            rule.redactor.redact_value(changes);
        }

        Ok(Verdict::Accepted(Event::from_occurrence(
            occurrence,
            session.clone(),
            severity,
            status,
        )))
    }
}

fn resolve_severity(category: ActivityCategory, explicit: Option<Severity>) -> Severity {
    explicit.unwrap_or_else(|| category.default_severity())
}

fn validate(occurrence: &Occurrence) -> Result<()> {
    if occurrence.action.trim().is_empty() {
        return Err(TelemetryError::Validation(format!(
            "{} occurrence has an empty action",
            occurrence.kind
        )));
    }
    if !occurrence.kind.is_activity() && (occurrence.severity.is_some() || occurrence.status.is_some()) {
        return Err(TelemetryError::Validation(format!(
            "{} occurrence '{}' carries activity-only severity/status",
            occurrence.kind, occurrence.action
        )));
    }
    Ok(())
}
