use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::events::{EngineEvent, EventHandle};
use crate::metrics;

use super::prober::ProxyProber;
use super::types::{ProxyHealth, ProxyOutcome, ProxyStatus};

/// How often the probe loop checks for due records.
const PROBE_TICK: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct ProxyRecord {
    url: String,
    health: ProxyHealth,
    consecutive_failures: u32,
    last_checked: Option<chrono::DateTime<Utc>>,
    /// Current probe backoff; doubles on every failed probe up to the cap.
    probe_backoff: Duration,
    next_probe_at: Option<Instant>,
}

impl ProxyRecord {
    fn new(url: String, base_backoff: Duration) -> Self {
        Self {
            url,
            health: ProxyHealth::Unknown,
            consecutive_failures: 0,
            last_checked: None,
            probe_backoff: base_backoff,
            next_probe_at: None,
        }
    }

    fn usable(&self) -> bool {
        self.health != ProxyHealth::Unhealthy
    }
}

#[derive(Debug)]
struct PoolInner {
    records: Vec<ProxyRecord>,
    cursor: usize,
    /// Whether the last acquire found no usable proxy. Used to emit the
    /// degraded-mode event once per transition instead of per call.
    degraded: bool,
}

/// Rotating pool of egress proxies.
///
/// Health is mutated only here, from worker outcome reports and probe
/// results. All state sits behind one pool-scoped mutex; critical
/// sections never await.
pub struct ProxyPool {
    config: ProxyConfig,
    inner: Mutex<PoolInner>,
    events: Option<EventHandle>,
}

impl ProxyPool {
    pub fn new(config: ProxyConfig) -> Self {
        let base_backoff = Duration::from_secs(config.probe_base_secs);
        let records = if config.enabled {
            config
                .proxies
                .iter()
                .map(|url| ProxyRecord::new(url.clone(), base_backoff))
                .collect()
        } else {
            Vec::new()
        };

        metrics::PROXIES_HEALTHY.set(records.len() as i64);

        Self {
            config,
            inner: Mutex::new(PoolInner {
                records,
                cursor: 0,
                degraded: false,
            }),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Pick the next usable proxy, round-robin. `None` means connect
    /// directly: the pool is disabled, empty, or fully unhealthy.
    pub async fn acquire(&self) -> Option<String> {
        let (picked, newly_degraded, unhealthy_count) = {
            let mut inner = self.inner.lock().await;
            if inner.records.is_empty() {
                return None;
            }

            let len = inner.records.len();
            let mut picked = None;
            for offset in 0..len {
                let idx = (inner.cursor + offset) % len;
                if inner.records[idx].usable() {
                    inner.cursor = (idx + 1) % len;
                    picked = Some(inner.records[idx].url.clone());
                    break;
                }
            }

            match picked {
                Some(url) => {
                    inner.degraded = false;
                    (Some(url), false, 0)
                }
                None => {
                    let newly = !inner.degraded;
                    inner.degraded = true;
                    (None, newly, len)
                }
            }
        };

        if newly_degraded {
            warn!("All proxies unhealthy, falling back to direct connections");
            if let Some(ref events) = self.events {
                events
                    .emit(EngineEvent::ProxyPoolDegraded {
                        unhealthy_count,
                    })
                    .await;
            }
        }

        picked
    }

    /// Report a fetch outcome for a proxy.
    pub async fn report(&self, proxy_url: &str, outcome: ProxyOutcome) {
        let event = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.records.iter_mut().find(|r| r.url == proxy_url)
            else {
                return;
            };

            match outcome {
                ProxyOutcome::Success => {
                    record.consecutive_failures = 0;
                    record.probe_backoff = Duration::from_secs(self.config.probe_base_secs);
                    let was_unhealthy = record.health == ProxyHealth::Unhealthy;
                    record.health = ProxyHealth::Healthy;
                    was_unhealthy.then(|| EngineEvent::ProxyRestored {
                        proxy: record.url.clone(),
                    })
                }
                ProxyOutcome::TransientFailure | ProxyOutcome::FatalFailure => {
                    record.consecutive_failures += 1;
                    if record.health != ProxyHealth::Unhealthy
                        && record.consecutive_failures >= self.config.unhealthy_after
                    {
                        record.health = ProxyHealth::Unhealthy;
                        record.next_probe_at = Some(Instant::now() + record.probe_backoff);
                        Some(EngineEvent::ProxyUnhealthy {
                            proxy: record.url.clone(),
                            consecutive_failures: record.consecutive_failures,
                        })
                    } else {
                        None
                    }
                }
            }
        };

        self.update_gauge().await;

        if let (Some(events), Some(event)) = (&self.events, event) {
            events.emit(event).await;
        }
    }

    /// Status of every record, for the API.
    pub async fn status(&self) -> Vec<ProxyStatus> {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .map(|r| ProxyStatus {
                url: r.url.clone(),
                health: r.health,
                consecutive_failures: r.consecutive_failures,
                last_checked: r.last_checked,
            })
            .collect()
    }

    /// Count of records currently eligible for rotation.
    pub async fn usable_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.records.iter().filter(|r| r.usable()).count()
    }

    /// Probe every Unhealthy record whose backoff has elapsed.
    ///
    /// Probing happens without the pool lock held; results are applied
    /// afterwards.
    pub async fn run_probe_cycle(&self, prober: &dyn ProxyProber) {
        let due: Vec<String> = {
            let inner = self.inner.lock().await;
            let now = Instant::now();
            inner
                .records
                .iter()
                .filter(|r| {
                    r.health == ProxyHealth::Unhealthy
                        && r.next_probe_at.map(|at| at <= now).unwrap_or(true)
                })
                .map(|r| r.url.clone())
                .collect()
        };

        for url in due {
            let ok = prober.probe(&url).await;
            let event = {
                let mut inner = self.inner.lock().await;
                let Some(record) = inner.records.iter_mut().find(|r| r.url == url) else {
                    continue;
                };
                record.last_checked = Some(Utc::now());

                if ok {
                    info!(proxy = url, "Proxy recovered");
                    record.health = ProxyHealth::Healthy;
                    record.consecutive_failures = 0;
                    record.probe_backoff = Duration::from_secs(self.config.probe_base_secs);
                    record.next_probe_at = None;
                    Some(EngineEvent::ProxyRestored {
                        proxy: record.url.clone(),
                    })
                } else {
                    let cap = Duration::from_secs(self.config.probe_cap_secs);
                    record.probe_backoff = (record.probe_backoff * 2).min(cap);
                    record.next_probe_at = Some(Instant::now() + record.probe_backoff);
                    debug!(
                        proxy = url,
                        backoff_secs = record.probe_backoff.as_secs(),
                        "Proxy still down"
                    );
                    None
                }
            };

            if let (Some(events), Some(event)) = (&self.events, event) {
                events.emit(event).await;
            }
        }

        self.update_gauge().await;
    }

    async fn update_gauge(&self) {
        metrics::PROXIES_HEALTHY.set(self.usable_count().await as i64);
    }

    /// Spawn the background probe loop. Exits on shutdown signal.
    pub fn spawn_probe_loop(
        pool: Arc<Self>,
        prober: Arc<dyn ProxyProber>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Proxy probe loop started");
            let mut tick = interval(PROBE_TICK);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Proxy probe loop received shutdown signal");
                        break;
                    }
                    _ = tick.tick() => {
                        pool.run_probe_cycle(prober.as_ref()).await;
                    }
                }
            }
            info!("Proxy probe loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EngineEvent, EventHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn pool_config(proxies: &[&str]) -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            proxies: proxies.iter().map(|s| s.to_string()).collect(),
            unhealthy_after: 3,
            probe_enabled: true,
            probe_base_secs: 30,
            probe_cap_secs: 600,
            probe_url: "http://example.com".to_string(),
        }
    }

    struct ScriptedProber {
        result: AtomicBool,
    }

    impl ScriptedProber {
        fn new(result: bool) -> Self {
            Self {
                result: AtomicBool::new(result),
            }
        }
    }

    #[async_trait]
    impl ProxyProber for ScriptedProber {
        async fn probe(&self, _proxy_url: &str) -> bool {
            self.result.load(Ordering::Relaxed)
        }
    }

    async fn mark_unhealthy(pool: &ProxyPool, url: &str) {
        for _ in 0..3 {
            pool.report(url, ProxyOutcome::TransientFailure).await;
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let pool = ProxyPool::new(pool_config(&["http://a:1", "http://b:1", "http://c:1"]));

        assert_eq!(pool.acquire().await.unwrap(), "http://a:1");
        assert_eq!(pool.acquire().await.unwrap(), "http://b:1");
        assert_eq!(pool.acquire().await.unwrap(), "http://c:1");
        assert_eq!(pool.acquire().await.unwrap(), "http://a:1");
    }

    #[tokio::test]
    async fn test_disabled_pool_returns_none() {
        let mut config = pool_config(&["http://a:1"]);
        config.enabled = false;
        let pool = ProxyPool::new(config);
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_returns_none() {
        let pool = ProxyPool::new(pool_config(&[]));
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_after_consecutive_failures() {
        let pool = ProxyPool::new(pool_config(&["http://a:1", "http://b:1"]));

        // Two failures: still in rotation.
        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;
        pool.report("http://a:1", ProxyOutcome::FatalFailure).await;
        assert_eq!(pool.usable_count().await, 2);

        // Third trips the threshold.
        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;
        assert_eq!(pool.usable_count().await, 1);

        // Rotation now only yields b.
        assert_eq!(pool.acquire().await.unwrap(), "http://b:1");
        assert_eq!(pool.acquire().await.unwrap(), "http://b:1");
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let pool = ProxyPool::new(pool_config(&["http://a:1"]));

        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;
        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;
        pool.report("http://a:1", ProxyOutcome::Success).await;
        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;
        pool.report("http://a:1", ProxyOutcome::TransientFailure).await;

        // Never hit 3 consecutive; still usable.
        assert_eq!(pool.usable_count().await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_degrades_to_direct() {
        let (tx, mut rx) = mpsc::channel(16);
        let pool = ProxyPool::new(pool_config(&["http://a:1"]))
            .with_events(EventHandle::new(tx));

        mark_unhealthy(&pool, "http://a:1").await;

        // Doesn't block, doesn't error: direct connection.
        assert!(pool.acquire().await.is_none());
        // Second acquire in the same degraded period emits nothing new.
        assert!(pool.acquire().await.is_none());

        let mut degraded_events = 0;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.event, EngineEvent::ProxyPoolDegraded { .. }) {
                degraded_events += 1;
            }
        }
        assert_eq!(degraded_events, 1);
    }

    #[tokio::test]
    async fn test_probe_restores_unhealthy_proxy() {
        let (tx, mut rx) = mpsc::channel(16);
        let pool = ProxyPool::new(pool_config(&["http://a:1"]))
            .with_events(EventHandle::new(tx));

        mark_unhealthy(&pool, "http://a:1").await;
        assert_eq!(pool.usable_count().await, 0);

        // Fast-forward past the 30s probe backoff.
        {
            let mut inner = pool.inner.lock().await;
            inner.records[0].next_probe_at = None;
        }

        let prober = ScriptedProber::new(true);
        pool.run_probe_cycle(&prober).await;

        assert_eq!(pool.usable_count().await, 1);
        assert_eq!(pool.acquire().await.unwrap(), "http://a:1");

        let restored = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e.event, EngineEvent::ProxyRestored { .. }));
        assert!(restored);
    }

    #[tokio::test]
    async fn test_probe_backoff_doubles_up_to_cap() {
        let mut config = pool_config(&["http://a:1"]);
        config.probe_base_secs = 30;
        config.probe_cap_secs = 100;
        let pool = ProxyPool::new(config);

        mark_unhealthy(&pool, "http://a:1").await;

        let prober = ScriptedProber::new(false);
        // Fast-forward past the initial 30s backoff.
        {
            let mut inner = pool.inner.lock().await;
            inner.records[0].next_probe_at = None;
        }

        pool.run_probe_cycle(&prober).await;
        {
            let inner = pool.inner.lock().await;
            assert_eq!(inner.records[0].probe_backoff, Duration::from_secs(60));
        }

        {
            let mut inner = pool.inner.lock().await;
            inner.records[0].next_probe_at = None;
        }
        pool.run_probe_cycle(&prober).await;
        {
            let inner = pool.inner.lock().await;
            // Capped at 100, not 120.
            assert_eq!(inner.records[0].probe_backoff, Duration::from_secs(100));
        }
    }

    #[tokio::test]
    async fn test_probe_skips_records_not_due() {
        let pool = ProxyPool::new(pool_config(&["http://a:1"]));
        mark_unhealthy(&pool, "http://a:1").await;

        // next_probe_at is 30s out; an immediate cycle must not probe.
        let prober = ScriptedProber::new(true);
        pool.run_probe_cycle(&prober).await;
        assert_eq!(pool.usable_count().await, 0);
    }

    #[tokio::test]
    async fn test_probe_only_touches_unhealthy() {
        let pool = ProxyPool::new(pool_config(&["http://a:1", "http://b:1"]));
        pool.report("http://a:1", ProxyOutcome::Success).await;

        let prober = ScriptedProber::new(false);
        pool.run_probe_cycle(&prober).await;

        // Healthy/unknown records untouched.
        assert_eq!(pool.usable_count().await, 2);
    }
}
