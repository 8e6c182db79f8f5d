//! Feed ingestion service: binary entrypoint.
//! Boots the Axum HTTP server, wiring the store, feed transport, feed
//! registry, optional scheduler and the Prometheus exporter.

use std::sync::Arc;
use std::time::Duration;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_ingest::config::{IngestOptions, StoreConfig};
use news_ingest::ingest::config::load_feeds_default;
use news_ingest::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use news_ingest::ingest::transport::HttpTransport;
use news_ingest::metrics::Metrics;
use news_ingest::{create_router, AppState, Ingestor, PostgrestStore, RecordStore};

const ENV_LOG_JSON: &str = "INGEST_LOG_JSON";

/// Install a fmt subscriber unless the runtime already did.
/// `INGEST_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_ingest=info,warn"));

    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Missing store settings are fatal at startup
    let store_cfg = StoreConfig::from_env()?;
    let store: Arc<dyn RecordStore> =
        Arc::new(PostgrestStore::new(&store_cfg).map_err(anyhow::Error::from)?);

    let opts = IngestOptions::from_env();
    let transport =
        Arc::new(HttpTransport::new(opts.http_timeout).map_err(anyhow::Error::from)?);
    let feeds = load_feeds_default()?;
    tracing::info!(feeds = ?feeds.names(), concurrency = opts.concurrency, "feed registry loaded");

    let feeds = feeds.into_shared();
    let ingestor = Arc::new(Ingestor::new(store.clone(), transport, opts));

    if let Some(cfg) = IngestSchedulerCfg::from_env() {
        tracing::info!(interval = ?Duration::from_secs(cfg.interval_secs), "ingest scheduler enabled");
        let _handle = spawn_scheduler(cfg, ingestor.clone(), feeds.clone());
    }

    let mut router = create_router(AppState::with_shared_feeds(ingestor, store, feeds));
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics exporter disabled"),
    }

    Ok(router.into())
}
