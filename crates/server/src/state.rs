use std::sync::Arc;

use magpie_core::{
    Config, DownloadEngine, DownloadHistory, EventStore, ProxyPool, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    engine: Arc<DownloadEngine>,
    proxy_pool: Arc<ProxyPool>,
    event_store: Arc<dyn EventStore>,
    history: Arc<dyn DownloadHistory>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: Arc<DownloadEngine>,
        proxy_pool: Arc<ProxyPool>,
        event_store: Arc<dyn EventStore>,
        history: Arc<dyn DownloadHistory>,
    ) -> Self {
        Self {
            config,
            engine,
            proxy_pool,
            event_store,
            history,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    pub fn proxy_pool(&self) -> &ProxyPool {
        &self.proxy_pool
    }

    pub fn event_store(&self) -> &dyn EventStore {
        self.event_store.as_ref()
    }

    pub fn history(&self) -> &dyn DownloadHistory {
        self.history.as_ref()
    }
}
