//! The download engine: job intake, pagination producers, worker pool.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, Descriptor, SiteAdapter};
use crate::config::{BlacklistConfig, Config, EngineConfig};
use crate::events::{EngineEvent, EventHandle};
use crate::fetch::MediaFetcher;
use crate::metrics;
use crate::progress::{ProgressDelta, ProgressSnapshot, ProgressTracker};
use crate::proxy::ProxyPool;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;

use super::paths::{dest_path, sanitize_filename};
use super::types::{
    CancelSignal, EngineError, EngineStatus, JobContext, JobInfo, JobQuery, JobSpec, Task,
};
use super::worker::run_worker;

/// Everything workers and producers share. Engine-internal.
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub blacklist: BlacklistConfig,
    pub registry: AdapterRegistry,
    pub rate_limiter: RateLimiter,
    pub proxy_pool: Arc<ProxyPool>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub retry_policy: RetryPolicy,
    pub progress: ProgressTracker,
    pub events: Option<EventHandle>,
    pub jobs: RwLock<HashMap<String, Arc<JobContext>>>,
}

/// The download orchestration engine.
///
/// One engine per session. Configuration is a snapshot taken at
/// construction; it is never re-read mid-session.
pub struct DownloadEngine {
    shared: Arc<EngineShared>,
    task_tx: mpsc::Sender<Task>,
    /// Taken by `start`; the engine runs once per instance.
    task_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl DownloadEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        blacklist: BlacklistConfig,
        source_rates: HashMap<String, f32>,
        registry: AdapterRegistry,
        proxy_pool: Arc<ProxyPool>,
        fetcher: Arc<dyn MediaFetcher>,
        events: Option<EventHandle>,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let retry_policy = RetryPolicy::from_engine_config(&config);
        let rate_limiter = RateLimiter::new(source_rates, config.default_rate_per_sec);

        Self {
            shared: Arc::new(EngineShared {
                config,
                blacklist,
                registry,
                rate_limiter,
                proxy_pool,
                fetcher,
                retry_policy,
                progress: ProgressTracker::new(),
                events,
                jobs: RwLock::new(HashMap::new()),
            }),
            task_tx,
            task_rx: Mutex::new(Some(task_rx)),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Build an engine from a loaded configuration snapshot.
    pub fn from_config(
        config: &Config,
        registry: AdapterRegistry,
        proxy_pool: Arc<ProxyPool>,
        fetcher: Arc<dyn MediaFetcher>,
        events: Option<EventHandle>,
    ) -> Self {
        let source_rates = config
            .sources
            .iter()
            .filter_map(|s| s.rate_per_sec.map(|rate| (s.name.clone(), rate)))
            .collect();

        Self::new(
            config.engine.clone(),
            config.blacklist.clone(),
            source_rates,
            registry,
            proxy_pool,
            fetcher,
            events,
        )
    }

    /// Start the worker pool.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return;
        }

        let Some(rx) = self.task_rx.lock().await.take() else {
            warn!("Engine was already started once; start ignored");
            return;
        };
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..self.shared.config.concurrent_downloads {
            tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&self.shared),
                Arc::clone(&rx),
                self.shutdown_tx.subscribe(),
            ));
        }

        info!(
            workers = self.shared.config.concurrent_downloads,
            queue = self.shared.config.queue_capacity,
            "Download engine started"
        );
    }

    /// Stop the engine: cancel every live job and shut the workers down.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Engine not running");
            return;
        }

        let jobs: Vec<Arc<JobContext>> =
            self.shared.jobs.read().await.values().cloned().collect();
        for job in jobs {
            job.cancel.cancel();
        }

        let _ = self.shutdown_tx.send(());
        info!("Download engine stopped");
    }

    /// Submit a job. Returns its id.
    ///
    /// Fails fast if the source is unknown or the destination directory
    /// cannot be created (the one job-level catastrophic error).
    pub async fn submit(&self, spec: JobSpec) -> Result<String, EngineError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }

        let adapter = self
            .shared
            .registry
            .get(&spec.source)
            .ok_or_else(|| EngineError::UnknownSource(spec.source.clone()))?;

        let dest_root = spec
            .dest_dir
            .clone()
            .unwrap_or_else(|| self.shared.config.output_dir.clone());
        let source_dir = dest_root.join(sanitize_filename(&spec.source));
        fs::create_dir_all(&source_dir)
            .await
            .map_err(|e| EngineError::DestinationUnusable(e.to_string()))?;

        let job_id = Uuid::new_v4().to_string();

        let mut blacklist_tags: HashSet<String> = self
            .shared
            .blacklist
            .tags
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        blacklist_tags.extend(spec.extra_blacklist_tags.iter().map(|t| t.to_lowercase()));
        let blacklist_formats: HashSet<String> = self
            .shared
            .blacklist
            .formats
            .iter()
            .map(|f| f.to_lowercase())
            .collect();

        let job = Arc::new(JobContext {
            id: job_id.clone(),
            source: spec.source.clone(),
            query: spec.query.clone(),
            dest_root,
            blacklist_tags,
            blacklist_formats,
            cancel: CancelSignal::new(),
            producer_done: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        self.shared.progress.register(&job_id).await;
        self.shared
            .jobs
            .write()
            .await
            .insert(job_id.clone(), Arc::clone(&job));

        metrics::JOBS_SUBMITTED.inc();
        info!(
            job_id,
            source = spec.source,
            query = job.query.summary(),
            "Job submitted"
        );
        if let Some(ref events) = self.shared.events {
            events
                .emit(EngineEvent::JobSubmitted {
                    job_id: job_id.clone(),
                    source: spec.source.clone(),
                    query: job.query.summary(),
                    dest_dir: job.dest_root.display().to_string(),
                })
                .await;
        }

        tokio::spawn(run_producer(
            Arc::clone(&self.shared),
            adapter,
            job,
            self.task_tx.clone(),
        ));

        Ok(job_id)
    }

    /// Cancel a job. In-flight tasks drain to a cancelled terminal state;
    /// other jobs are untouched.
    pub async fn cancel(&self, job_id: &str) -> Result<(), EngineError> {
        let job = self
            .shared
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        job.cancel.cancel();
        info!(job_id, "Job cancelled");
        if let Some(ref events) = self.shared.events {
            events
                .emit(EngineEvent::JobCancelled {
                    job_id: job_id.to_string(),
                })
                .await;
        }

        // Nothing may be in flight at all; settle immediately if so.
        finalize_if_drained(&self.shared, &job).await;
        Ok(())
    }

    /// Point-in-time progress for a job (live or drained).
    pub async fn snapshot(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.shared.progress.snapshot(job_id).await
    }

    /// Subscribe to a job's snapshot stream. One snapshot per state
    /// change; the stream closes when the job drains. `None` when the
    /// job is unknown or already drained (read `snapshot` for the final
    /// state in that case).
    pub async fn subscribe(
        &self,
        job_id: &str,
    ) -> Option<broadcast::Receiver<ProgressSnapshot>> {
        self.shared.progress.subscribe(job_id).await
    }

    /// Progress of every job the tracker knows about.
    pub async fn all_snapshots(&self) -> Vec<ProgressSnapshot> {
        self.shared.progress.all_snapshots().await
    }

    /// Live jobs with their specs and progress.
    pub async fn jobs(&self) -> Vec<JobInfo> {
        let jobs: Vec<Arc<JobContext>> =
            self.shared.jobs.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(jobs.len());
        for job in jobs {
            if let Some(progress) = self.shared.progress.snapshot(&job.id).await {
                infos.push(JobInfo {
                    job_id: job.id.clone(),
                    source: job.source.clone(),
                    query: job.query.summary(),
                    dest_dir: job.dest_root.clone(),
                    cancelled: job.cancel.is_cancelled(),
                    progress,
                });
            }
        }
        infos
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running.load(Ordering::Relaxed),
            workers: self.shared.config.concurrent_downloads,
            live_jobs: self.shared.jobs.read().await.len(),
        }
    }

    /// Rate limit status for one source, if it has been used.
    pub async fn rate_status(
        &self,
        source: &str,
    ) -> Option<crate::ratelimit::RateLimitStatus> {
        self.shared.rate_limiter.status(source).await
    }
}

/// Pagination producer: expands one job into tasks, lazily.
///
/// Runs one page at a time and blocks on the bounded queue, so a slow
/// worker pool stops pagination instead of ballooning memory.
async fn run_producer(
    shared: Arc<EngineShared>,
    adapter: Arc<dyn SiteAdapter>,
    job: Arc<JobContext>,
    tx: mpsc::Sender<Task>,
) {
    debug!(job_id = job.id, "Producer started");
    let mut seen: HashSet<PathBuf> = HashSet::new();

    match job.query.clone() {
        JobQuery::Tags(tags) => {
            let mut page: u32 = 1;
            loop {
                if job.cancel.is_cancelled() {
                    break;
                }

                let result = tokio::select! {
                    _ = job.cancel.cancelled() => break,
                    result = adapter.search_page(&tags, page) => result,
                };

                match result {
                    Ok(descriptor_page) => {
                        let mut stopped = false;
                        for descriptor in descriptor_page.descriptors {
                            if !enqueue(&shared, &job, &tx, &mut seen, descriptor).await {
                                stopped = true;
                                break;
                            }
                        }
                        if stopped || !descriptor_page.has_more {
                            break;
                        }
                        page += 1;
                    }
                    Err(e) => {
                        warn!(job_id = job.id, page, "Pagination failed: {}", e);
                        shared
                            .progress
                            .update(
                                &job.id,
                                ProgressDelta {
                                    last_error: Some(format!("pagination: {}", e)),
                                    ..Default::default()
                                },
                            )
                            .await;
                        break;
                    }
                }
            }
        }
        JobQuery::Urls(urls) => {
            for url in urls {
                if job.cancel.is_cancelled() {
                    break;
                }

                let result = tokio::select! {
                    _ = job.cancel.cancelled() => break,
                    result = adapter.resolve_direct(&url) => result,
                };

                match result {
                    Ok(descriptor) => {
                        if !enqueue(&shared, &job, &tx, &mut seen, descriptor).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(job_id = job.id, url, "Direct resolve failed: {}", e);
                        shared
                            .progress
                            .update(
                                &job.id,
                                ProgressDelta {
                                    failed: 1,
                                    last_error: Some(format!("{}: {}", url, e)),
                                    ..Default::default()
                                },
                            )
                            .await;
                        if let Some(ref events) = shared.events {
                            events
                                .emit(EngineEvent::TaskFailed {
                                    job_id: job.id.clone(),
                                    source: job.source.clone(),
                                    remote_id: url.clone(),
                                    kind: "permanent".to_string(),
                                    error: e.to_string(),
                                    attempts: 0,
                                })
                                .await;
                        }
                    }
                }
            }
        }
    }

    job.producer_done.store(true, Ordering::SeqCst);
    debug!(job_id = job.id, "Producer finished");
    finalize_if_drained(&shared, &job).await;
}

/// Enqueue one descriptor as a task. Returns false when the producer
/// should stop (cancellation or engine shutdown).
async fn enqueue(
    shared: &Arc<EngineShared>,
    job: &Arc<JobContext>,
    tx: &mpsc::Sender<Task>,
    seen: &mut HashSet<PathBuf>,
    descriptor: Descriptor,
) -> bool {
    let dest = dest_path(&job.dest_root, &job.source, &descriptor.filename);

    // Pagination overlap repeats descriptors; one destination path gets
    // one task per job.
    if !seen.insert(dest.clone()) {
        debug!(job_id = job.id, dest = %dest.display(), "Duplicate descriptor dropped");
        return true;
    }

    shared
        .progress
        .update(&job.id, ProgressDelta::enqueued(1))
        .await;

    let task = Task {
        job: Arc::clone(job),
        descriptor,
        dest,
    };

    // A full queue applies backpressure right here.
    tokio::select! {
        _ = job.cancel.cancelled() => {
            shared
                .progress
                .update(&job.id, ProgressDelta::cancelled_pending())
                .await;
            false
        }
        sent = tx.send(task) => {
            if sent.is_err() {
                // Queue closed: engine shut down underneath us.
                shared
                    .progress
                    .update(&job.id, ProgressDelta::cancelled_pending())
                    .await;
                false
            } else {
                true
            }
        }
    }
}

/// Settle a job whose work has run dry: final snapshot, stream close,
/// events. Safe to call from racing workers; only one wins.
pub(crate) async fn finalize_if_drained(shared: &Arc<EngineShared>, job: &Arc<JobContext>) {
    if !job.producer_done.load(Ordering::SeqCst) {
        return;
    }
    let Some(snapshot) = shared.progress.snapshot(&job.id).await else {
        return;
    };
    if snapshot.pending != 0 || snapshot.active != 0 || snapshot.drained {
        return;
    }
    if job.finished.swap(true, Ordering::SeqCst) {
        return;
    }

    shared.progress.finish(&job.id).await;
    shared.jobs.write().await.remove(&job.id);
    metrics::JOBS_DRAINED.inc();

    info!(
        job_id = job.id,
        completed = snapshot.completed,
        failed = snapshot.failed,
        skipped = snapshot.skipped,
        cancelled = snapshot.cancelled,
        "Job drained"
    );

    if let Some(ref events) = shared.events {
        if !job.cancel.is_cancelled() {
            events
                .emit(EngineEvent::JobCompleted {
                    job_id: job.id.clone(),
                    completed: snapshot.completed,
                    failed: snapshot.failed,
                    skipped: snapshot.skipped,
                    bytes_transferred: snapshot.bytes_transferred,
                })
                .await;
        }
    }
}
