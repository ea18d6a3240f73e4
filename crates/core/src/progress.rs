//! Per-job progress tracking.
//!
//! Workers apply deltas; observers read point-in-time snapshots or
//! subscribe to a broadcast stream that emits one snapshot per state
//! change and closes when the job drains. Counters live behind a per-job
//! mutex so jobs never contend with each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Broadcast buffer per job; slow subscribers skip to newer snapshots.
const SNAPSHOT_BUFFER: usize = 256;

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    /// Tasks enqueued but not yet claimed by a worker.
    pub pending: u64,
    /// Tasks currently owned by a worker.
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    /// True once no further snapshots will follow.
    pub drained: bool,
    /// Message of the most recent terminal failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A change applied atomically to a job's counters.
#[derive(Debug, Clone, Default)]
pub struct ProgressDelta {
    pub pending: i64,
    pub active: i64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub bytes: u64,
    pub last_error: Option<String>,
}

impl ProgressDelta {
    /// N new tasks entered the queue.
    pub fn enqueued(n: u64) -> Self {
        Self {
            pending: n as i64,
            ..Default::default()
        }
    }

    /// A worker claimed a task.
    pub fn claimed() -> Self {
        Self {
            pending: -1,
            active: 1,
            ..Default::default()
        }
    }

    /// An active task finished successfully.
    pub fn completed(bytes: u64) -> Self {
        Self {
            active: -1,
            completed: 1,
            bytes,
            ..Default::default()
        }
    }

    /// An active task failed for good.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            active: -1,
            failed: 1,
            last_error: Some(error.into()),
            ..Default::default()
        }
    }

    /// An active task hit the blacklist.
    pub fn skipped() -> Self {
        Self {
            active: -1,
            skipped: 1,
            ..Default::default()
        }
    }

    /// An active task was cancelled.
    pub fn cancelled() -> Self {
        Self {
            active: -1,
            cancelled: 1,
            ..Default::default()
        }
    }

    /// A pending task was cancelled before any worker claimed it.
    pub fn cancelled_pending() -> Self {
        Self {
            pending: -1,
            cancelled: 1,
            ..Default::default()
        }
    }
}

struct Counters {
    pending: u64,
    active: u64,
    completed: u64,
    failed: u64,
    skipped: u64,
    cancelled: u64,
    bytes_transferred: u64,
    started_at: DateTime<Utc>,
    drained: bool,
    last_error: Option<String>,
    /// Present until the job drains; dropping it closes subscriptions.
    tx: Option<broadcast::Sender<ProgressSnapshot>>,
}

impl Counters {
    fn snapshot(&self, job_id: &str) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: job_id.to_string(),
            pending: self.pending,
            active: self.active,
            completed: self.completed,
            failed: self.failed,
            skipped: self.skipped,
            cancelled: self.cancelled,
            bytes_transferred: self.bytes_transferred,
            started_at: self.started_at,
            drained: self.drained,
            last_error: self.last_error.clone(),
        }
    }
}

struct JobProgress {
    job_id: String,
    counters: Mutex<Counters>,
}

/// Tracks progress for every live job.
pub struct ProgressTracker {
    jobs: RwLock<HashMap<String, Arc<JobProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a job. Must happen before any update for it.
    pub async fn register(&self, job_id: &str) {
        let (tx, _) = broadcast::channel(SNAPSHOT_BUFFER);
        let progress = Arc::new(JobProgress {
            job_id: job_id.to_string(),
            counters: Mutex::new(Counters {
                pending: 0,
                active: 0,
                completed: 0,
                failed: 0,
                skipped: 0,
                cancelled: 0,
                bytes_transferred: 0,
                started_at: Utc::now(),
                drained: false,
                last_error: None,
                tx: Some(tx),
            }),
        });
        self.jobs
            .write()
            .await
            .insert(job_id.to_string(), progress);
    }

    /// Apply a delta and broadcast the resulting snapshot.
    ///
    /// Updates to unknown (or already drained) jobs are dropped.
    pub async fn update(&self, job_id: &str, delta: ProgressDelta) {
        let Some(progress) = self.get(job_id).await else {
            return;
        };

        let mut counters = progress.counters.lock().await;
        counters.pending = apply_signed(counters.pending, delta.pending);
        counters.active = apply_signed(counters.active, delta.active);
        counters.completed += delta.completed;
        counters.failed += delta.failed;
        counters.skipped += delta.skipped;
        counters.cancelled += delta.cancelled;
        counters.bytes_transferred += delta.bytes;
        if delta.last_error.is_some() {
            counters.last_error = delta.last_error;
        }

        let snapshot = counters.snapshot(&progress.job_id);
        if let Some(ref tx) = counters.tx {
            // No receivers is fine; nobody is watching.
            let _ = tx.send(snapshot);
        }
    }

    /// Point-in-time snapshot. `None` for unknown jobs.
    pub async fn snapshot(&self, job_id: &str) -> Option<ProgressSnapshot> {
        let progress = self.get(job_id).await?;
        let counters = progress.counters.lock().await;
        Some(counters.snapshot(&progress.job_id))
    }

    /// Snapshots of every known job.
    pub async fn all_snapshots(&self) -> Vec<ProgressSnapshot> {
        let jobs: Vec<Arc<JobProgress>> =
            self.jobs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(jobs.len());
        for progress in jobs {
            let counters = progress.counters.lock().await;
            snapshots.push(counters.snapshot(&progress.job_id));
        }
        snapshots
    }

    /// Subscribe to snapshot broadcasts for a job.
    ///
    /// Returns `None` for unknown or already drained jobs; callers should
    /// pair this with `snapshot` for the final state. The stream ends
    /// (channel closes) when the job drains.
    pub async fn subscribe(
        &self,
        job_id: &str,
    ) -> Option<broadcast::Receiver<ProgressSnapshot>> {
        let progress = self.get(job_id).await?;
        let counters = progress.counters.lock().await;
        counters.tx.as_ref().map(|tx| tx.subscribe())
    }

    /// Mark a job drained: emit the final snapshot and close the stream.
    pub async fn finish(&self, job_id: &str) {
        let Some(progress) = self.get(job_id).await else {
            return;
        };

        let mut counters = progress.counters.lock().await;
        counters.drained = true;
        let snapshot = counters.snapshot(&progress.job_id);
        if let Some(tx) = counters.tx.take() {
            let _ = tx.send(snapshot);
            // tx drops here, ending every subscription after the final
            // snapshot is delivered.
        }
    }

    async fn get(&self, job_id: &str) -> Option<Arc<JobProgress>> {
        self.jobs.read().await.get(job_id).cloned()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value + delta as u64
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
