//! Worker loop: the per-task pipeline.
//!
//! Each worker pulls from the shared queue and runs a claimed task
//! through admission, proxy selection, fetch, blacklist check, and the
//! final progress report. Transient failures back off and re-enter
//! admission; cancellation is observed at every suspension point.

use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, SiteAdapter};
use crate::events::EngineEvent;
use crate::fetch::FetchedFile;
use crate::metrics;
use crate::progress::ProgressDelta;
use crate::proxy::ProxyOutcome;
use crate::retry::{FetchError, RetryDecision};

use super::runner::{finalize_if_drained, EngineShared};
use super::types::Task;

/// Run one worker until shutdown or queue close.
pub(crate) async fn run_worker(
    worker_id: usize,
    shared: Arc<EngineShared>,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(worker_id, "Worker started");

    loop {
        // Lock scope covers only the claim; processing runs unlocked so
        // the next worker can pull meanwhile.
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            }
        };

        let job = Arc::clone(&task.job);
        process_task(&shared, task).await;
        finalize_if_drained(&shared, &job).await;
    }

    debug!(worker_id, "Worker stopped");
}

/// Drive one task to a terminal state.
async fn process_task(shared: &Arc<EngineShared>, task: Task) {
    let job = &task.job;
    let source = task.descriptor.source.clone();
    let started = Instant::now();

    shared.progress.update(&job.id, ProgressDelta::claimed()).await;

    if job.cancel.is_cancelled() {
        finish_cancelled(shared, &task).await;
        return;
    }

    // Idempotent resume: a destination that already holds the expected
    // content completes without a fetch.
    if let Ok(meta) = fs::metadata(&task.dest).await {
        let matches = match task.descriptor.expected_bytes {
            Some(expected) => meta.len() == expected,
            None => meta.len() > 0,
        };
        if matches {
            debug!(
                job_id = job.id,
                dest = %task.dest.display(),
                "Destination already present, skipping fetch"
            );
            shared
                .progress
                .update(&job.id, ProgressDelta::completed(0))
                .await;
            metrics::TASKS_FINISHED
                .with_label_values(&[&source, "completed"])
                .inc();
            emit_completed(shared, &task, meta.len()).await;
            return;
        }
    }

    let Some(adapter) = shared.registry.get(&source) else {
        // Can only happen if a job outlives its adapter registration.
        shared
            .progress
            .update(&job.id, ProgressDelta::failed(format!("unknown source {}", source)))
            .await;
        metrics::TASKS_FINISHED
            .with_label_values(&[&source, "failed"])
            .inc();
        return;
    };

    let mut attempt: u32 = 0;
    loop {
        // Pending -> Admitted
        let admit_started = Instant::now();
        tokio::select! {
            _ = job.cancel.cancelled() => {
                finish_cancelled(shared, &task).await;
                return;
            }
            _ = shared.rate_limiter.admit(&source) => {}
        }
        metrics::ADMISSION_WAIT
            .with_label_values(&[&source])
            .observe(admit_started.elapsed().as_secs_f64());

        let proxy = shared.proxy_pool.acquire().await;

        // Admitted -> Fetching
        let result = tokio::select! {
            _ = job.cancel.cancelled() => {
                finish_cancelled(shared, &task).await;
                return;
            }
            result = fetch_once(shared, adapter.as_ref(), &task, proxy.as_deref()) => result,
        };
        attempt += 1;

        match result {
            Ok(fetched) => {
                if let Some(ref proxy) = proxy {
                    shared.proxy_pool.report(proxy, ProxyOutcome::Success).await;
                }
                metrics::FETCH_ATTEMPTS
                    .with_label_values(&[&source, "success"])
                    .inc();

                // Blacklist check on the descriptor's metadata; a hit
                // leaves no output behind.
                if let Some(reason) = job.blacklist_hit(&task.descriptor) {
                    let _ = fs::remove_file(&task.dest).await;
                    info!(
                        job_id = job.id,
                        remote_id = task.descriptor.id,
                        reason, "Task skipped by blacklist"
                    );
                    shared.progress.update(&job.id, ProgressDelta::skipped()).await;
                    metrics::TASKS_FINISHED
                        .with_label_values(&[&source, "skipped"])
                        .inc();
                    if let Some(ref events) = shared.events {
                        events
                            .emit(EngineEvent::TaskSkipped {
                                job_id: job.id.clone(),
                                source: source.clone(),
                                remote_id: task.descriptor.id.clone(),
                                reason,
                            })
                            .await;
                    }
                    return;
                }

                shared
                    .progress
                    .update(&job.id, ProgressDelta::completed(fetched.bytes))
                    .await;
                metrics::TASKS_FINISHED
                    .with_label_values(&[&source, "completed"])
                    .inc();
                metrics::BYTES_TRANSFERRED.inc_by(fetched.bytes);
                metrics::TASK_DURATION
                    .with_label_values(&[&source])
                    .observe(started.elapsed().as_secs_f64());
                emit_completed(shared, &task, fetched.bytes).await;
                return;
            }
            Err(error) => {
                if let Some(ref proxy) = proxy {
                    shared.proxy_pool.report(proxy, proxy_outcome(&error)).await;
                }
                if error.is_rate_limited() {
                    shared.rate_limiter.apply_backpressure(&source).await;
                    metrics::THROTTLE_EVENTS.with_label_values(&[&source]).inc();
                    if let Some(ref events) = shared.events {
                        events
                            .emit(EngineEvent::SourceThrottled {
                                source: source.clone(),
                            })
                            .await;
                    }
                }
                let kind = if error.is_transient() { "transient" } else { "permanent" };
                metrics::FETCH_ATTEMPTS
                    .with_label_values(&[&source, kind])
                    .inc();

                match shared.retry_policy.decide(&error, attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            job_id = job.id,
                            remote_id = task.descriptor.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Fetch failed, retrying: {}", error
                        );
                        // Failed -> Pending: back off, then re-enter
                        // admission at the top of the loop.
                        tokio::select! {
                            _ = job.cancel.cancelled() => {
                                finish_cancelled(shared, &task).await;
                                return;
                            }
                            _ = sleep(delay) => {}
                        }
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            job_id = job.id,
                            remote_id = task.descriptor.id,
                            attempts = attempt,
                            "Task failed: {}", error
                        );
                        shared
                            .progress
                            .update(&job.id, ProgressDelta::failed(error.to_string()))
                            .await;
                        metrics::TASKS_FINISHED
                            .with_label_values(&[&source, "failed"])
                            .inc();
                        if let Some(ref events) = shared.events {
                            events
                                .emit(EngineEvent::TaskFailed {
                                    job_id: job.id.clone(),
                                    source: source.clone(),
                                    remote_id: task.descriptor.id.clone(),
                                    kind: kind.to_string(),
                                    error: error.to_string(),
                                    attempts: attempt,
                                })
                                .await;
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Resolve the descriptor and pull the bytes down.
async fn fetch_once(
    shared: &Arc<EngineShared>,
    adapter: &dyn SiteAdapter,
    task: &Task,
    proxy: Option<&str>,
) -> Result<FetchedFile, FetchError> {
    let resolved = adapter
        .resolve_media(&task.descriptor)
        .await
        .map_err(adapter_to_fetch)?;

    let fetched = shared.fetcher.fetch(&resolved.url, proxy, &task.dest).await?;

    // Zero bytes is an error unless the descriptor said so up front.
    if fetched.bytes == 0 && task.descriptor.expected_bytes != Some(0) {
        let _ = fs::remove_file(&task.dest).await;
        return Err(FetchError::EmptyBody);
    }

    Ok(fetched)
}

async fn finish_cancelled(shared: &Arc<EngineShared>, task: &Task) {
    shared
        .progress
        .update(&task.job.id, ProgressDelta::cancelled())
        .await;
    metrics::TASKS_FINISHED
        .with_label_values(&[&task.descriptor.source, "cancelled"])
        .inc();
}

async fn emit_completed(shared: &Arc<EngineShared>, task: &Task, bytes: u64) {
    if let Some(ref events) = shared.events {
        events
            .emit(EngineEvent::TaskCompleted {
                job_id: task.job.id.clone(),
                source: task.descriptor.source.clone(),
                remote_id: task.descriptor.id.clone(),
                path: task.dest.display().to_string(),
                bytes,
            })
            .await;
    }
}

/// What a fetch error says about the proxy that carried it.
///
/// Reaching the origin and getting an HTTP response, a broken body, or a
/// local disk problem is not the proxy's fault.
fn proxy_outcome(error: &FetchError) -> ProxyOutcome {
    match error {
        FetchError::Timeout | FetchError::Connection(_) => ProxyOutcome::TransientFailure,
        FetchError::Status(_)
        | FetchError::Body(_)
        | FetchError::DiskWrite(_)
        | FetchError::EmptyBody
        | FetchError::Malformed(_) => ProxyOutcome::Success,
    }
}

fn adapter_to_fetch(error: AdapterError) -> FetchError {
    match error {
        AdapterError::NotFound => FetchError::Status(404),
        AdapterError::Gone(id) => FetchError::Malformed(format!("media gone: {}", id)),
        AdapterError::ConnectionFailed(message) => FetchError::Connection(message),
        AdapterError::Timeout => FetchError::Timeout,
        AdapterError::ApiError { status: 0, message } => FetchError::Connection(message),
        AdapterError::ApiError { status, .. } => FetchError::Status(status),
        AdapterError::Parse(message) => FetchError::Malformed(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_outcome_mapping() {
        assert_eq!(
            proxy_outcome(&FetchError::Timeout),
            ProxyOutcome::TransientFailure
        );
        assert_eq!(
            proxy_outcome(&FetchError::Connection("reset".into())),
            ProxyOutcome::TransientFailure
        );
        // The proxy did its job if the origin answered at all.
        assert_eq!(proxy_outcome(&FetchError::Status(500)), ProxyOutcome::Success);
        assert_eq!(
            proxy_outcome(&FetchError::DiskWrite("full".into())),
            ProxyOutcome::Success
        );
    }

    #[test]
    fn test_adapter_error_mapping() {
        assert!(matches!(
            adapter_to_fetch(AdapterError::NotFound),
            FetchError::Status(404)
        ));
        assert!(matches!(
            adapter_to_fetch(AdapterError::Gone("1".into())),
            FetchError::Malformed(_)
        ));
        assert!(matches!(
            adapter_to_fetch(AdapterError::Timeout),
            FetchError::Timeout
        ));
        assert!(matches!(
            adapter_to_fetch(AdapterError::ApiError {
                status: 502,
                message: "bad gateway".into()
            }),
            FetchError::Status(502)
        ));
        assert!(matches!(
            adapter_to_fetch(AdapterError::Parse("truncated".into())),
            FetchError::Malformed(_)
        ));
    }
}
