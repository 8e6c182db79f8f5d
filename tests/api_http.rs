// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health, GET /feeds
// - POST /ingest/{feed}  (success, unknown feed, fetch failure, timeout)
// - GET /articles, /articles/{id}, /articles/stats, /sources

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use news_ingest::config::IngestOptions;
use news_ingest::ingest::config::FeedRegistry;
use news_ingest::ingest::transport::FixtureTransport;
use news_ingest::{create_router, AppState, Ingestor, MemoryStore, RecordStore};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests
const FEED_URL: &str = "https://www.coindesk.com/arc/outboundfeeds/rss/";

fn coindesk_body() -> String {
    let p = format!("{}/tests/fixtures/coindesk.xml", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(p).expect("read fixture")
}

/// Build the same Router the binary uses, over an in-memory store.
fn test_router(transport: FixtureTransport, opts: IngestOptions) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn RecordStore> = store.clone();
    let ingestor = Arc::new(Ingestor::new(dyn_store.clone(), Arc::new(transport), opts));
    let state = AppState::new(ingestor, dyn_store, FeedRegistry::default_seed());
    (create_router(state), store)
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn send_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let (status, bytes) = send(app, method, uri).await;
    let v: Json = serde_json::from_slice(&bytes).expect("valid json");
    (status, v)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _) = test_router(FixtureTransport::new(), IngestOptions::default());
    let (status, bytes) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK, "health should be 200");
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "ok");
}

#[tokio::test]
async fn api_feeds_lists_registry() {
    let (app, _) = test_router(FixtureTransport::new(), IngestOptions::default());
    let (status, v) = send_json(&app, "GET", "/feeds").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v[0]["name"], "coindesk");
    assert_eq!(v[0]["source"]["name"], "CoinDesk");
}

#[tokio::test]
async fn api_ingest_returns_camel_case_result() {
    let transport = FixtureTransport::new().with_body(FEED_URL, coindesk_body());
    let (app, store) = test_router(transport, IngestOptions::default());

    let (status, v) = send_json(&app, "POST", "/ingest/coindesk").await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["upsertedSources"], 1);
    assert_eq!(v["inserted"], 3);
    assert_eq!(v["skippedExisting"], 0);
    assert!(v["sourceId"].is_i64());
    assert_eq!(v["errors"], serde_json::json!([]));
    assert_eq!(store.len("articles"), 3);

    // route slug is case-insensitive; second run skips everything
    let (status, v) = send_json(&app, "POST", "/ingest/CoinDesk").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["inserted"], 0);
    assert_eq!(v["skippedExisting"], 3);
}

#[tokio::test]
async fn api_ingest_unknown_feed_is_404() {
    let (app, _) = test_router(FixtureTransport::new(), IngestOptions::default());
    let (status, v) = send_json(&app, "POST", "/ingest/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(v["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn api_ingest_fetch_failure_is_502_with_kind() {
    let transport = FixtureTransport::new().with_status(FEED_URL, 500);
    let (app, _) = test_router(transport, IngestOptions::default());
    let (status, v) = send_json(&app, "POST", "/ingest/coindesk").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["kind"], "fetch");
    assert!(v["error"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn api_ingest_malformed_feed_is_502() {
    let transport = FixtureTransport::new().with_body(FEED_URL, "<rss><channel>");
    let (app, _) = test_router(transport, IngestOptions::default());
    let (status, v) = send_json(&app, "POST", "/ingest/coindesk").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["kind"], "malformed_feed");
}

#[tokio::test(start_paused = true)]
async fn api_ingest_deadline_is_504_with_partial() {
    let transport = FixtureTransport::new()
        .with_body(FEED_URL, coindesk_body())
        .with_latency(Duration::from_secs(30));
    let opts = IngestOptions {
        deadline: Some(Duration::from_secs(1)),
        ..IngestOptions::default()
    };
    let (app, store) = test_router(transport, opts);
    let (status, v) = send_json(&app, "POST", "/ingest/coindesk").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(v["kind"], "timeout");
    assert_eq!(v["remaining"], Json::Null);
    assert_eq!(v["partial"]["upsertedSources"], 1);
    assert_eq!(v["partial"]["inserted"], 0);
    assert!(store.is_empty("articles"));
}

#[tokio::test]
async fn api_read_side_after_ingest() {
    let transport = FixtureTransport::new().with_body(FEED_URL, coindesk_body());
    let (app, _) = test_router(transport, IngestOptions::default());
    let (status, _) = send(&app, "POST", "/ingest/coindesk").await;
    assert_eq!(status, StatusCode::OK);

    // newest first, undated last
    let (status, v) = send_json(&app, "GET", "/articles?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], true);
    assert_eq!(v["count"], 2);
    assert_eq!(v["data"][0]["guid"], "cd-0001");
    assert_eq!(v["data"][0]["sources"]["name"], "CoinDesk");
    assert_eq!(v["pagination"]["hasMore"], true);
    assert_eq!(v["filters"]["limit"], 2);

    let id = v["data"][0]["id"].as_i64().unwrap();
    let (status, one) = send_json(&app, "GET", &format!("/articles/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["data"]["guid"], "cd-0001");

    let (status, missing) = send_json(&app, "GET", "/articles/999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["success"], false);

    let (status, stats) = send_json(&app, "GET", "/articles/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["data"]["totalArticles"], 3);
    assert_eq!(stats["data"]["bySource"]["CoinDesk"], 3);
    assert_eq!(stats["data"]["dateRange"]["startDate"], "all");

    let (status, recent) = send_json(&app, "GET", "/articles/recent?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent["count"], 3);
    assert_eq!(recent["pagination"]["hasMore"], false);

    let (status, sources) = send_json(&app, "GET", "/sources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sources["count"], 1);
    assert_eq!(sources["data"][0]["url"], "https://www.coindesk.com");

    let (status, by_src) = send_json(&app, "GET", "/sources/CoinDesk/articles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_src["count"], 3);
    assert_eq!(by_src["filters"]["sourceName"], "CoinDesk");
}

#[tokio::test]
async fn api_admin_reload_feeds_reads_repo_config() {
    // cwd is the package root, which ships config/feeds.toml
    let (app, _) = test_router(FixtureTransport::new(), IngestOptions::default());
    let (status, bytes) = send(&app, "POST", "/admin/reload-feeds").await;
    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8(bytes).expect("utf8");
    assert!(body.starts_with("reloaded"), "{body}");

    let (_, v) = send_json(&app, "GET", "/feeds").await;
    assert_eq!(v[0]["name"], "coindesk");
}

#[tokio::test]
async fn api_admin_reload_swaps_the_shared_registry() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        Arc::new(FixtureTransport::new()),
        IngestOptions::default(),
    ));
    let shared = FeedRegistry::new(Vec::new()).into_shared();
    let app = create_router(AppState::with_shared_feeds(ingestor, store, shared.clone()));

    let (status, _) = send(&app, "POST", "/admin/reload-feeds").await;
    assert_eq!(status, StatusCode::OK);
    // the scheduler holds the same handle
    let names = shared.read().unwrap().names();
    assert_eq!(names, vec!["coindesk".to_string()]);
}
