use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Decides whether a proxy is usable again.
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, proxy_url: &str) -> bool;
}

/// Probes a proxy by fetching a known URL through it.
pub struct HttpProber {
    test_url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(test_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyProber for HttpProber {
    async fn probe(&self, proxy_url: &str) -> bool {
        let proxy = match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => proxy,
            Err(e) => {
                debug!(proxy_url, "Unparseable proxy URL: {}", e);
                return false;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!(proxy_url, "Failed to build probe client: {}", e);
                return false;
            }
        };

        match client.get(&self.test_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(proxy_url, "Probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_proxy_url_probes_false() {
        let prober = HttpProber::new("http://example.com", Duration::from_secs(1));
        assert!(!prober.probe("definitely not a url").await);
    }
}
