// src/capture/session.rs
//! Per-run session identity
//!
//! The session id is created on first use and memoized for the lifetime of
//! the manager (the process, for [`SessionManager::global`]).

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use ulid::Ulid;

/// Identifier of one continuous run of the capturing process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(format!("session_{}", Ulid::new()))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static GLOBAL: Lazy<Arc<SessionManager>> = Lazy::new(|| Arc::new(SessionManager::new()));

/// Lazily creates and memoizes the session id
#[derive(Debug, Default)]
pub struct SessionManager {
    current: OnceCell<SessionId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            current: OnceCell::new(),
        }
    }

    /// Process-wide manager
    pub fn global() -> Arc<SessionManager> {
        Arc::clone(&GLOBAL)
    }

    pub fn current_session(&self) -> SessionId {
        self.current
            .get_or_init(|| {
                let id = SessionId::generate();
                debug!("Started telemetry session {}", id);
                id
            })
            .clone()
    }

    /// Whether a session has been created yet
    pub fn is_started(&self) -> bool {
        self.current.get().is_some()
    }
}
