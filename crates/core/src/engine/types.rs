//! Engine types: jobs, tasks, errors.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::adapter::Descriptor;
use crate::progress::ProgressSnapshot;

/// What a job asks its source for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobQuery {
    /// Paginate the source's search for these tags.
    Tags(Vec<String>),
    /// Resolve these item URLs directly, no search.
    Urls(Vec<String>),
}

impl JobQuery {
    /// Short human-readable form for logs and events.
    pub fn summary(&self) -> String {
        match self {
            JobQuery::Tags(tags) => format!("tags:{}", tags.join(" ")),
            JobQuery::Urls(urls) => format!("urls:{}", urls.len()),
        }
    }
}

/// A caller-submitted unit of work. Immutable after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Source to pull from; must be a registered adapter.
    pub source: String,
    pub query: JobQuery,
    /// Output root override; the engine default is used when absent.
    /// Files always land under `<root>/<source>/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_dir: Option<PathBuf>,
    /// Tags blacklisted for this job on top of the session blacklist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_blacklist_tags: Vec<String>,
}

/// A submitted job with its current progress, for status APIs.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub source: String,
    pub query: String,
    pub dest_dir: PathBuf,
    pub cancelled: bool,
    pub progress: ProgressSnapshot,
}

/// Engine-wide status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub workers: usize,
    pub live_jobs: usize,
}

/// Errors from the engine's caller interface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Engine is not running")]
    NotRunning,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Destination directory unusable: {0}")]
    DestinationUnusable(String),
}

/// Cancellation signal carried by every job.
///
/// The flag answers "has this job been cancelled" without waiting; the
/// broadcast side wakes suspension points (admission, fetch, backoff).
#[derive(Debug)]
pub struct CancelSignal {
    flag: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            flag: AtomicBool::new(false),
            tx,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the job is cancelled. Safe to call repeatedly and
    /// after the fact.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // A cancel between the flag check and subscribe still lands in
        // the channel error path below.
        if self.is_cancelled() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared per-job state, owned by the engine and referenced by tasks.
pub(crate) struct JobContext {
    pub id: String,
    pub source: String,
    pub query: JobQuery,
    /// Root that `<source>/<filename>` gets appended to.
    pub dest_root: PathBuf,
    pub blacklist_tags: HashSet<String>,
    pub blacklist_formats: HashSet<String>,
    pub cancel: CancelSignal,
    /// Set once pagination has stopped producing tasks.
    pub producer_done: AtomicBool,
    /// Guards against finalizing the job twice.
    pub finished: AtomicBool,
}

impl JobContext {
    /// The first blacklist entry this descriptor trips, if any.
    pub fn blacklist_hit(&self, descriptor: &Descriptor) -> Option<String> {
        for tag in &descriptor.tags {
            if self.blacklist_tags.contains(tag.as_str()) {
                return Some(format!("tag:{}", tag));
            }
        }
        if self.blacklist_formats.contains(descriptor.format.as_str()) {
            return Some(format!("format:{}", descriptor.format));
        }
        None
    }
}

/// One fetchable item, owned by the queue until a worker claims it.
pub(crate) struct Task {
    pub job: std::sync::Arc<JobContext>,
    pub descriptor: Descriptor,
    pub dest: PathBuf,
}
