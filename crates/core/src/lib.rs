pub mod adapter;
pub mod config;
pub mod engine;
pub mod events;
pub mod fetch;
pub mod metrics;
pub mod progress;
pub mod proxy;
pub mod ratelimit;
pub mod retry;
pub mod testing;

pub use adapter::{
    AdapterError, AdapterRegistry, BooruAdapter, BooruAdapterConfig, Descriptor,
    DescriptorPage, ResolvedMedia, SiteAdapter,
};
pub use config::{
    load_config, load_config_from_str, validate_config, BlacklistConfig, Config, ConfigError,
    EngineConfig, ProxyConfig, SanitizedConfig, ServerConfig, SourceConfig,
};
pub use engine::{
    sanitize_filename, DownloadEngine, EngineError, EngineStatus, JobInfo, JobQuery, JobSpec,
};
pub use events::{
    create_event_system, DownloadEntry, DownloadHistory, EngineEvent, EventError, EventFilter,
    EventHandle, EventRecord, EventStore, EventWriter, SqliteEventLog,
};
pub use fetch::{FetchedFile, HttpFetcher, MediaFetcher};
pub use progress::{ProgressDelta, ProgressSnapshot, ProgressTracker};
pub use proxy::{HttpProber, ProxyHealth, ProxyOutcome, ProxyPool, ProxyProber, ProxyStatus};
pub use ratelimit::{RateLimitStatus, RateLimiter};
pub use retry::{FetchError, RetryDecision, RetryPolicy};
