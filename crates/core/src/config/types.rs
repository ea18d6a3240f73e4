use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    /// Configured media sources. An empty list is valid; jobs can only
    /// target sources listed here.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Look up a source's configuration by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration (event log + download history)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("magpie.db")
}

/// Download engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Number of concurrent download workers.
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
    /// Capacity of the shared task queue; a full queue blocks pagination.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum fetch attempts per task before it fails for good.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry backoff in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Retry backoff ceiling in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Admission rate for sources without an explicit rate limit,
    /// in requests per second.
    #[serde(default = "default_rate_per_sec")]
    pub default_rate_per_sec: f32,
    /// Root directory for downloaded files; per-source subdirectories
    /// are created beneath it.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: default_concurrent_downloads(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            default_rate_per_sec: default_rate_per_sec(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_concurrent_downloads() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    64
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_rate_per_sec() -> f32 {
    1.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("media")
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Whether to route fetches through the proxy pool at all.
    #[serde(default)]
    pub enabled: bool,
    /// Proxy URLs, e.g. "http://10.0.0.1:8080".
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Consecutive failures before a proxy is pulled from rotation.
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,
    /// Whether the background health probe runs.
    #[serde(default = "default_probe_enabled")]
    pub probe_enabled: bool,
    /// Initial probe backoff per proxy in seconds.
    #[serde(default = "default_probe_base_secs")]
    pub probe_base_secs: u64,
    /// Probe backoff ceiling in seconds.
    #[serde(default = "default_probe_cap_secs")]
    pub probe_cap_secs: u64,
    /// URL fetched through a proxy to decide whether it works.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxies: Vec::new(),
            unhealthy_after: default_unhealthy_after(),
            probe_enabled: default_probe_enabled(),
            probe_base_secs: default_probe_base_secs(),
            probe_cap_secs: default_probe_cap_secs(),
            probe_url: default_probe_url(),
        }
    }
}

fn default_unhealthy_after() -> u32 {
    3
}

fn default_probe_enabled() -> bool {
    true
}

fn default_probe_base_secs() -> u64 {
    30
}

fn default_probe_cap_secs() -> u64 {
    600
}

fn default_probe_url() -> String {
    "http://httpbin.org/ip".to_string()
}

/// Blacklist configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BlacklistConfig {
    /// A descriptor carrying any of these tags is skipped.
    #[serde(default)]
    pub tags: Vec<String>,
    /// File formats (extensions, lowercase) that are skipped.
    #[serde(default)]
    pub formats: Vec<String>,
}

/// A single configured media source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source identifier used in jobs and output paths, e.g. "e621".
    pub name: String,
    /// API base URL, e.g. "https://e621.net".
    pub base_url: String,
    /// Admission rate in requests per second; falls back to
    /// `engine.default_rate_per_sec` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_per_sec: Option<f32>,
    /// Results requested per page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Optional API username (basic auth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional API key (basic auth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_page_limit() -> u32 {
    320
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub proxy: SanitizedProxyConfig,
    pub blacklist: BlacklistConfig,
    pub sources: Vec<SanitizedSourceConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProxyConfig {
    pub enabled: bool,
    pub proxy_count: usize,
    pub unhealthy_after: u32,
    pub probe_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSourceConfig {
    pub name: String,
    pub base_url: String,
    pub rate_per_sec: Option<f32>,
    pub page_limit: u32,
    pub has_credentials: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            proxy: SanitizedProxyConfig {
                enabled: config.proxy.enabled,
                proxy_count: config.proxy.proxies.len(),
                unhealthy_after: config.proxy.unhealthy_after,
                probe_enabled: config.proxy.probe_enabled,
            },
            blacklist: config.blacklist.clone(),
            sources: config
                .sources
                .iter()
                .map(|s| SanitizedSourceConfig {
                    name: s.name.clone(),
                    base_url: s.base_url.clone(),
                    rate_per_sec: s.rate_per_sec,
                    page_limit: s.page_limit,
                    has_credentials: s.api_key.is_some(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.concurrent_downloads, 3);
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.server.port, 8080);
        assert!(!config.proxy.enabled);
        assert!(config.sources.is_empty());
        assert!(config.blacklist.tags.is_empty());
    }

    #[test]
    fn test_source_lookup() {
        let toml = r#"
[[sources]]
name = "e621"
base_url = "https://e621.net"
rate_per_sec = 2.0

[[sources]]
name = "rule34"
base_url = "https://api.rule34.xxx"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(
            config.source("e621").unwrap().rate_per_sec,
            Some(2.0)
        );
        assert!(config.source("rule34").unwrap().rate_per_sec.is_none());
        assert!(config.source("nope").is_none());
    }

    #[test]
    fn test_sanitized_config_redacts_credentials() {
        let toml = r#"
[[sources]]
name = "e621"
base_url = "https://e621.net"
username = "user"
api_key = "secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.sources[0].has_credentials);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("api_key"));
    }

    #[test]
    fn test_sanitized_proxy_hides_addresses() {
        let mut config: Config = toml::from_str("").unwrap();
        config.proxy.enabled = true;
        config.proxy.proxies = vec!["http://10.0.0.1:8080".to_string()];

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.proxy.proxy_count, 1);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("10.0.0.1"));
    }
}
