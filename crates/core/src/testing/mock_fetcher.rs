//! Mock media fetcher for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::fetch::{FetchedFile, MediaFetcher};
use crate::retry::FetchError;

/// A recorded fetch call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub url: String,
    pub proxy: Option<String>,
    pub dest: PathBuf,
}

/// Mock implementation of `MediaFetcher`.
///
/// By default every fetch writes a small payload to the destination and
/// succeeds. Tests can script per-URL payloads, queue errors consumed
/// one per call, and inspect recorded calls.
pub struct MockFetcher {
    default_payload: Vec<u8>,
    payloads: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Errors served before any success, per URL, consumed in order.
    errors: Arc<RwLock<HashMap<String, VecDeque<FetchError>>>>,
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    /// Artificial latency per fetch, for concurrency-shaped tests.
    delay: Arc<RwLock<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            default_payload: b"media-bytes".to_vec(),
            payloads: Arc::new(RwLock::new(HashMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            fetches: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Script the bytes served for a URL.
    pub async fn set_payload(&self, url: &str, payload: Vec<u8>) {
        self.payloads
            .write()
            .await
            .insert(url.to_string(), payload);
    }

    /// Queue an error for a URL; each queued error fails one fetch, then
    /// later fetches succeed.
    pub async fn push_error(&self, url: &str, error: FetchError) {
        self.errors
            .write()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    /// Queue the same transient error `n` times.
    pub async fn fail_times(&self, url: &str, n: usize) {
        for _ in 0..n {
            self.push_error(url, FetchError::Timeout).await;
        }
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<&str>,
        dest: &Path,
    ) -> Result<FetchedFile, FetchError> {
        self.fetches.write().await.push(RecordedFetch {
            url: url.to_string(),
            proxy: proxy.map(String::from),
            dest: dest.to_path_buf(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(queue) = self.errors.write().await.get_mut(url) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        let payload = self
            .payloads
            .read()
            .await
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_payload.clone());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::DiskWrite(e.to_string()))?;
        }
        tokio::fs::write(dest, &payload)
            .await
            .map_err(|e| FetchError::DiskWrite(e.to_string()))?;

        Ok(FetchedFile {
            path: dest.to_path_buf(),
            bytes: payload.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_fetch_writes_payload() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.png");

        let fetcher = MockFetcher::new();
        let fetched = fetcher.fetch("http://x/a.png", None, &dest).await.unwrap();

        assert!(dest.exists());
        assert_eq!(fetched.bytes, b"media-bytes".len() as u64);
        assert_eq!(fetcher.fetch_count().await, 1);
    }

    #[tokio::test]
    async fn test_queued_errors_then_success() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.png");

        let fetcher = MockFetcher::new();
        fetcher.fail_times("http://x/a.png", 2).await;

        assert!(fetcher.fetch("http://x/a.png", None, &dest).await.is_err());
        assert!(fetcher.fetch("http://x/a.png", None, &dest).await.is_err());
        assert!(fetcher.fetch("http://x/a.png", None, &dest).await.is_ok());
    }

    #[tokio::test]
    async fn test_records_proxy() {
        let temp = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher
            .fetch(
                "http://x/a.png",
                Some("http://proxy:8080"),
                &temp.path().join("a.png"),
            )
            .await
            .unwrap();

        let recorded = fetcher.recorded_fetches().await;
        assert_eq!(recorded[0].proxy.as_deref(), Some("http://proxy:8080"));
    }

    #[tokio::test]
    async fn test_scripted_payload() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("b.png");

        let fetcher = MockFetcher::new();
        fetcher.set_payload("http://x/b.png", vec![0u8; 2048]).await;

        let fetched = fetcher.fetch("http://x/b.png", None, &dest).await.unwrap();
        assert_eq!(fetched.bytes, 2048);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("c.png");

        let fetcher = MockFetcher::new();
        fetcher.set_payload("http://x/c.png", vec![]).await;

        let fetched = fetcher.fetch("http://x/c.png", None, &dest).await.unwrap();
        assert_eq!(fetched.bytes, 0);
    }
}
