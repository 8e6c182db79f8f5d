use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::articles::{
    ArticleFilter, ArticleQueries, QueryError, DEFAULT_PAGE_LIMIT, DEFAULT_RECENT_LIMIT,
};
use crate::ingest::config::{load_feeds_default, FeedRegistry, SharedFeeds};
use crate::ingest::error::IngestError;
use crate::ingest::types::FeedDescriptor;
use crate::ingest::Ingestor;
use crate::store::RecordStore;

#[derive(Clone)]
pub struct AppState {
    ingestor: Arc<Ingestor>,
    feeds: SharedFeeds,
    queries: ArticleQueries,
}

impl AppState {
    pub fn new(ingestor: Arc<Ingestor>, store: Arc<dyn RecordStore>, feeds: FeedRegistry) -> Self {
        Self::with_shared_feeds(ingestor, store, feeds.into_shared())
    }

    /// Use a registry handle that other tasks (the scheduler) also read.
    pub fn with_shared_feeds(
        ingestor: Arc<Ingestor>,
        store: Arc<dyn RecordStore>,
        feeds: SharedFeeds,
    ) -> Self {
        Self {
            ingestor,
            feeds,
            queries: ArticleQueries::new(store),
        }
    }

    fn feed(&self, name: &str) -> Option<FeedDescriptor> {
        self.feeds.read().ok()?.get(name).cloned()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/feeds", get(list_feeds))
        .route("/ingest/{feed}", post(ingest_feed))
        .route("/articles", get(filtered_articles))
        .route("/articles/recent", get(recent_articles))
        .route("/articles/stats", get(article_stats))
        .route("/articles/{id}", get(article_by_id))
        .route("/sources", get(list_sources))
        .route("/sources/{name}/articles", get(articles_by_source))
        .route("/admin/reload-feeds", post(admin_reload_feeds))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match self {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match &self {
            QueryError::NotFound(_) => "Article not found".to_string(),
            QueryError::Store { .. } => self.to_string(),
        };
        (status, Json(json!({ "success": false, "error": error }))).into_response()
    }
}

async fn list_feeds(State(state): State<AppState>) -> Json<Vec<FeedDescriptor>> {
    let feeds = match state.feeds.read() {
        Ok(g) => g.iter().cloned().collect(),
        Err(_) => Vec::new(),
    };
    Json(feeds)
}

async fn ingest_feed(State(state): State<AppState>, Path(feed): Path<String>) -> Response {
    let Some(desc) = state.feed(&feed) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown feed '{feed}'") })),
        )
            .into_response();
    };

    match state.ingestor.ingest(&desc).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            let error = e.to_string();
            let kind = e.kind();
            match e {
                IngestError::Timeout { partial, remaining } => (
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(json!({
                        "error": error,
                        "kind": kind,
                        "remaining": remaining,
                        "partial": partial,
                    })),
                )
                    .into_response(),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": error, "kind": kind })),
                )
                    .into_response(),
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticlesQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    source_id: Option<i64>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn filtered_articles(
    State(state): State<AppState>,
    Query(q): Query<ArticlesQuery>,
) -> Result<Response, QueryError> {
    let filter = ArticleFilter {
        start_date: q.start_date,
        end_date: q.end_date,
        source_id: q.source_id,
        source_name: None,
        limit: q.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        offset: q.offset.unwrap_or(0),
    };
    Ok(Json(state.queries.filtered(filter).await?).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn recent_articles(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Response, QueryError> {
    let limit = q.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Ok(Json(state.queries.recent(limit).await?).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn article_stats(
    State(state): State<AppState>,
    Query(q): Query<StatsQuery>,
) -> Result<Response, QueryError> {
    let stats = state
        .queries
        .stats(q.start_date.as_deref(), q.end_date.as_deref())
        .await?;
    Ok(Json(stats).into_response())
}

async fn article_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, QueryError> {
    Ok(Json(state.queries.by_id(id).await?).into_response())
}

async fn list_sources(State(state): State<AppState>) -> Result<Response, QueryError> {
    Ok(Json(state.queries.sources().await?).into_response())
}

async fn articles_by_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Response, QueryError> {
    let page = state
        .queries
        .by_source(
            &name,
            q.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            q.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(page).into_response())
}

async fn admin_reload_feeds(State(state): State<AppState>) -> String {
    let fresh = match load_feeds_default() {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "feed registry reload failed");
            return format!("failed: {e}");
        }
    };
    match state.feeds.write() {
        Ok(mut w) => {
            let n = fresh.len();
            *w = fresh;
            format!("reloaded {n} feed(s)")
        }
        Err(_) => "failed: lock poisoned".to_string(),
    }
}
