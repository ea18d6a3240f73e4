use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // Session lifecycle
    SessionStarted {
        version: String,
        sources: Vec<String>,
    },
    SessionStopped {
        reason: String,
    },

    // Job lifecycle
    JobSubmitted {
        job_id: String,
        source: String,
        query: String,
        dest_dir: String,
    },
    JobCompleted {
        job_id: String,
        completed: u64,
        failed: u64,
        skipped: u64,
        bytes_transferred: u64,
    },
    JobCancelled {
        job_id: String,
    },
    JobFailed {
        job_id: String,
        error: String,
    },

    // Task terminals
    TaskCompleted {
        job_id: String,
        source: String,
        remote_id: String,
        path: String,
        bytes: u64,
    },
    TaskFailed {
        job_id: String,
        source: String,
        remote_id: String,
        /// "transient" (retries exhausted) or "permanent"
        kind: String,
        error: String,
        attempts: u32,
    },
    TaskSkipped {
        job_id: String,
        source: String,
        remote_id: String,
        /// What tripped the blacklist, e.g. "tag:gore" or "format:swf"
        reason: String,
    },

    // Degraded-mode / throttling signals
    ProxyPoolDegraded {
        unhealthy_count: usize,
    },
    ProxyUnhealthy {
        proxy: String,
        consecutive_failures: u32,
    },
    ProxyRestored {
        proxy: String,
    },
    SourceThrottled {
        source: String,
    },
}

impl EngineEvent {
    /// Snake-case type name, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::SessionStarted { .. } => "session_started",
            EngineEvent::SessionStopped { .. } => "session_stopped",
            EngineEvent::JobSubmitted { .. } => "job_submitted",
            EngineEvent::JobCompleted { .. } => "job_completed",
            EngineEvent::JobCancelled { .. } => "job_cancelled",
            EngineEvent::JobFailed { .. } => "job_failed",
            EngineEvent::TaskCompleted { .. } => "task_completed",
            EngineEvent::TaskFailed { .. } => "task_failed",
            EngineEvent::TaskSkipped { .. } => "task_skipped",
            EngineEvent::ProxyPoolDegraded { .. } => "proxy_pool_degraded",
            EngineEvent::ProxyUnhealthy { .. } => "proxy_unhealthy",
            EngineEvent::ProxyRestored { .. } => "proxy_restored",
            EngineEvent::SourceThrottled { .. } => "source_throttled",
        }
    }

    /// Job this event belongs to, when it belongs to one.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EngineEvent::JobSubmitted { job_id, .. }
            | EngineEvent::JobCompleted { job_id, .. }
            | EngineEvent::JobCancelled { job_id }
            | EngineEvent::JobFailed { job_id, .. }
            | EngineEvent::TaskCompleted { job_id, .. }
            | EngineEvent::TaskFailed { job_id, .. }
            | EngineEvent::TaskSkipped { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

/// A stored event with its assigned id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub data: EngineEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = EngineEvent::TaskSkipped {
            job_id: "j1".to_string(),
            source: "e621".to_string(),
            remote_id: "42".to_string(),
            reason: "tag:gore".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"task_skipped""#));
        assert_eq!(event.event_type(), "task_skipped");
    }

    #[test]
    fn test_job_id_extraction() {
        let with_job = EngineEvent::JobCancelled {
            job_id: "j1".to_string(),
        };
        assert_eq!(with_job.job_id(), Some("j1"));

        let without_job = EngineEvent::ProxyPoolDegraded { unhealthy_count: 3 };
        assert_eq!(without_job.job_id(), None);
    }

    #[test]
    fn test_roundtrip() {
        let event = EngineEvent::TaskCompleted {
            job_id: "j1".to_string(),
            source: "rule34".to_string(),
            remote_id: "77".to_string(),
            path: "media/rule34/77.png".to_string(),
            bytes: 1234,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, EngineEvent::TaskCompleted { bytes: 1234, .. }));
    }
}
