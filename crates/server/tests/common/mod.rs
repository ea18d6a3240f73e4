//! Common test utilities for in-process API testing with mocks.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use magpie_core::{
    create_event_system, load_config_from_str,
    testing::{MockAdapter, MockFetcher},
    AdapterRegistry, DownloadEngine, DownloadHistory, EventStore, ProxyPool, SourceConfig,
    SqliteEventLog,
};

use magpie_server::api::create_router;
use magpie_server::state::AppState;

/// Re-export fixtures for test convenience
pub use magpie_core::testing::fixtures;

/// In-process server with mock adapter and fetcher injected.
pub struct TestFixture {
    pub router: Router,
    pub adapter: Arc<MockAdapter>,
    pub fetcher: Arc<MockFetcher>,
    pub engine: Arc<DownloadEngine>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        // All-defaults config, pointed at the temp dir.
        let mut config = load_config_from_str("").expect("empty config parses");
        config.engine.output_dir = temp_dir.path().to_path_buf();
        config.engine.retry_base_ms = 1;
        config.engine.retry_max_delay_ms = 10;
        config.database.path = temp_dir.path().join("test.db");
        config.sources = vec![SourceConfig {
            name: "e621".to_string(),
            base_url: "https://e621.net".to_string(),
            rate_per_sec: Some(1000.0),
            page_limit: 320,
            username: None,
            api_key: None,
        }];

        let adapter = Arc::new(MockAdapter::new("e621"));
        let fetcher = Arc::new(MockFetcher::new());

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::clone(&adapter) as Arc<dyn magpie_core::SiteAdapter>);

        let event_log =
            Arc::new(SqliteEventLog::new(&config.database.path).expect("event log"));
        let event_store: Arc<dyn EventStore> = Arc::clone(&event_log) as Arc<dyn EventStore>;
        let history: Arc<dyn DownloadHistory> =
            Arc::clone(&event_log) as Arc<dyn DownloadHistory>;

        let (event_handle, event_writer) = create_event_system(Arc::clone(&event_store), 100);
        tokio::spawn(event_writer.with_history(Arc::clone(&history)).run());

        let proxy_pool = Arc::new(ProxyPool::new(config.proxy.clone()));

        let engine = Arc::new(DownloadEngine::from_config(
            &config,
            registry,
            Arc::clone(&proxy_pool),
            Arc::clone(&fetcher) as Arc<dyn magpie_core::MediaFetcher>,
            Some(event_handle),
        ));
        engine.start().await;

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&engine),
            proxy_pool,
            event_store,
            history,
        ));
        let router = create_router(state);

        Self {
            router,
            adapter,
            fetcher,
            engine,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Poll a job until its snapshot reports drained.
    pub async fn wait_for_drained(&self, job_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            if response.status == StatusCode::OK
                && response.body["drained"].as_bool() == Some(true)
            {
                return response.body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} did not drain in time",
                job_id
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
