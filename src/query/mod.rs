// src/query/mod.rs
//! Retained history, statistics and search

pub mod history;
pub mod search;
pub mod stats;

pub use history::EventHistory;
pub use search::{SearchCriteria, SearchResults};
pub use stats::EventStats;
