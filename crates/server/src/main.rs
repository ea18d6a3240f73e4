use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magpie_core::{
    create_event_system, load_config, validate_config, AdapterRegistry, BooruAdapter,
    BooruAdapterConfig, DownloadEngine, DownloadHistory, EngineEvent, EventStore, HttpFetcher,
    HttpProber, ProxyPool, SiteAdapter, SqliteEventLog,
};

use magpie_server::api::create_router;
use magpie_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the engine event channel
const EVENT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("MAGPIE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Output directory: {:?}", config.engine.output_dir);

    // Event log (events + download history)
    let event_log =
        Arc::new(SqliteEventLog::new(&config.database.path).context("Failed to open event log")?);
    let event_store: Arc<dyn EventStore> = Arc::clone(&event_log) as Arc<dyn EventStore>;
    let history: Arc<dyn DownloadHistory> = Arc::clone(&event_log) as Arc<dyn DownloadHistory>;

    // Event system
    let (event_handle, event_writer) =
        create_event_system(Arc::clone(&event_store), EVENT_BUFFER_SIZE);
    let event_writer = event_writer.with_history(Arc::clone(&history));
    let writer_handle = tokio::spawn(event_writer.run());

    // Site adapters, one per configured source
    let mut registry = AdapterRegistry::new();
    for source in &config.sources {
        let adapter_config =
            BooruAdapterConfig::from_source(source, config.engine.request_timeout_secs);
        let adapter = BooruAdapter::new(adapter_config)
            .with_context(|| format!("Failed to create adapter for '{}'", source.name))?;
        info!(source = source.name, base_url = source.base_url, "Registered source");
        registry.register(Arc::new(adapter) as Arc<dyn SiteAdapter>);
    }
    let source_names = registry.source_names();

    // Proxy pool + background health probe
    let proxy_pool = Arc::new(ProxyPool::new(config.proxy.clone()).with_events(event_handle.clone()));
    let (probe_shutdown_tx, _) = broadcast::channel(1);
    let probe_handle = if config.proxy.enabled && config.proxy.probe_enabled {
        let prober = Arc::new(HttpProber::new(
            config.proxy.probe_url.clone(),
            Duration::from_secs(config.engine.request_timeout_secs),
        ));
        info!(proxies = config.proxy.proxies.len(), "Proxy pool enabled with health probe");
        Some(ProxyPool::spawn_probe_loop(
            Arc::clone(&proxy_pool),
            prober,
            probe_shutdown_tx.subscribe(),
        ))
    } else {
        None
    };

    // Fetcher and engine
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.engine.request_timeout_secs,
    )));
    let engine = Arc::new(DownloadEngine::from_config(
        &config,
        registry,
        Arc::clone(&proxy_pool),
        fetcher,
        Some(event_handle.clone()),
    ));
    engine.start().await;

    event_handle
        .emit(EngineEvent::SessionStarted {
            version: VERSION.to_string(),
            sources: source_names,
        })
        .await;

    // HTTP server
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&engine),
        Arc::clone(&proxy_pool),
        event_store,
        history,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Graceful shutdown: stop the engine, then flush events.
    info!("Shutting down");
    engine.stop().await;
    let _ = probe_shutdown_tx.send(());
    if let Some(handle) = probe_handle {
        let _ = handle.await;
    }

    event_handle
        .emit(EngineEvent::SessionStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;
    drop(event_handle);
    drop(engine);
    drop(proxy_pool);

    // The writer exits once every event handle clone is gone.
    if tokio::time::timeout(Duration::from_secs(5), writer_handle)
        .await
        .is_err()
    {
        error!("Event writer did not flush in time");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
