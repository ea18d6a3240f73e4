use chrono::{DateTime, Utc};
use thiserror::Error;

use super::EventRecord;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying stored events
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub job_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: i64,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            job_id: None,
            event_type: None,
            limit: 100,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for event persistence
pub trait EventStore: Send + Sync {
    /// Insert an event record, returns the assigned id
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError>;

    /// Query stored events, newest first
    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError>;
}

/// One completed download in the history ledger.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub source: String,
    pub remote_id: String,
    pub path: String,
    pub bytes: u64,
    pub downloaded_at: DateTime<Utc>,
}

/// Ledger of completed downloads, kept so re-runs can tell what they
/// already have even after the files move.
pub trait DownloadHistory: Send + Sync {
    /// Record a completed download. Re-recording the same (source, id)
    /// replaces the previous entry.
    fn record(&self, entry: &DownloadEntry) -> Result<(), EventError>;

    /// Whether this (source, remote id) pair has been downloaded before.
    fn was_downloaded(&self, source: &str, remote_id: &str) -> Result<bool, EventError>;

    /// Most recent downloads, newest first.
    fn recent(&self, limit: i64) -> Result<Vec<DownloadEntry>, EventError>;
}
