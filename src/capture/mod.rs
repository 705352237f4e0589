// src/capture/mod.rs
//! Occurrence capture
//!
//! Everything that happens before an event enters the buffer:
//!
//! - **Event**: occurrence and event model, kind/severity/status tag sets
//! - **Session**: lazily created per-run session id
//! - **Filter**: kind gating, sampling, exclusion rules, severity floor
//! - **Redact**: one-way digests for sensitive payload fields
//!
//! ```text
//! Occurrence → validate → kind enabled? → sample → excluded? → severity ≥ min?
//!                                                                   ↓
//!                                                    redact payload/changes
//!                                                                   ↓
//!                                                     Event (immutable)
//! ```

pub mod event;
pub mod filter;
pub mod redact;
pub mod session;

pub use event::{
    ActivityCategory, Event, EventId, EventKind, Occurrence, Severity, Status, TelemetryKind,
};
pub use filter::{DropReason, EventFilter, FilterRule, Verdict};
pub use redact::Redactor;
pub use session::{SessionId, SessionManager};
