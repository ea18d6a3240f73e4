//! HTTP fetcher implementation.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::retry::FetchError;

use super::traits::{FetchedFile, MediaFetcher};

/// Streams media over HTTP, direct or through a proxy.
///
/// reqwest binds a proxy at client construction, so one client is kept
/// per proxy (plus one for direct connections) and reused across fetches.
pub struct HttpFetcher {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.map(String::from);

        {
            let clients = self.clients.lock().unwrap();
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("magpie/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| FetchError::Connection(format!("bad proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        self.clients
            .lock()
            .unwrap()
            .insert(key, client.clone());
        Ok(client)
    }
}

/// Temp path a download is staged at before the final rename.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connection(e.to_string())
    } else {
        FetchError::Body(e.to_string())
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<&str>,
        dest: &Path,
    ) -> Result<FetchedFile, FetchError> {
        let client = self.client_for(proxy)?;

        let response = client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::DiskWrite(e.to_string()))?;
        }

        let part = part_path(dest);
        let mut file = File::create(&part)
            .await
            .map_err(|e| FetchError::DiskWrite(e.to_string()))?;

        let mut bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = fs::remove_file(&part).await;
                    return Err(classify(e));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&part).await;
                return Err(FetchError::DiskWrite(e.to_string()));
            }
            bytes += chunk.len() as u64;
        }

        if let Err(e) = file.flush().await {
            let _ = fs::remove_file(&part).await;
            return Err(FetchError::DiskWrite(e.to_string()));
        }
        drop(file);

        fs::rename(&part, dest)
            .await
            .map_err(|e| FetchError::DiskWrite(e.to_string()))?;

        debug!(url, bytes, dest = %dest.display(), "Fetch complete");

        Ok(FetchedFile {
            path: dest.to_path_buf(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/out/e621/42.png")),
            PathBuf::from("/out/e621/42.png.part")
        );
    }

    #[tokio::test]
    async fn test_bad_proxy_is_connection_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        let result = fetcher
            .fetch(
                "http://example.com/x.png",
                Some("not a proxy url"),
                Path::new("/tmp/never-written.png"),
            )
            .await;
        assert!(matches!(result, Err(FetchError::Connection(_))));
    }

    #[test]
    fn test_client_cache_reuses_clients() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        fetcher.client_for(None).unwrap();
        fetcher.client_for(None).unwrap();
        fetcher.client_for(Some("http://127.0.0.1:9")).unwrap();
        assert_eq!(fetcher.clients.lock().unwrap().len(), 2);
    }
}
