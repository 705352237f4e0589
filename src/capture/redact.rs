// src/capture/redact.rs
//! Sensitive-field redaction
//!
//! Values under sensitive keys are replaced by a one-way digest. This is a
//! redaction step for analytics data, not encryption: it hides the raw value
//! but offers no confidentiality guarantee beyond that.

use crate::utils::errors::{Result, TelemetryError};
use regex::RegexSet;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Prefix marking a redacted value
pub const REDACTED_PREFIX: &str = "redacted:sha256:";

/// Field-name patterns redacted when none are configured
pub const DEFAULT_SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "ssn",
    "credit.?card",
    "cvv",
    "secret",
    "token",
];

/// Compiled set of sensitive field-name patterns
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: RegexSet,
}

impl Redactor {
    /// Compile patterns; matching is case-insensitive
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(
            patterns
                .into_iter()
                .map(|p| format!("(?i){}", p.as_ref())),
        )
        .map_err(|e| TelemetryError::ConfigError(format!("Invalid sensitive field pattern: {}", e)))?;

        Ok(Self { patterns })
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.patterns.is_match(field)
    }

    /// Redact matching keys in place, descending into nested objects and arrays
    pub fn redact_map(&self, map: &mut Map<String, Value>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::String(digest(value));
            } else {
                self.redact_value(value);
            }
        }
    }

    pub fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => self.redact_map(map),
            Value::Array(items) => items.iter_mut().for_each(|item| self.redact_value(item)),
            _ => {}
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_PATTERNS).expect("default patterns compile")
    }
}

/// Deterministic one-way digest of a JSON value
pub fn digest(value: &Value) -> String {
    let canonical = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("{}{}", REDACTED_PREFIX, &hex[..32])
}
