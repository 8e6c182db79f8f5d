// src/articles.rs
//! Read-side queries over ingested articles.
//!
//! Thin pass-throughs to the store. Each article row is returned with its
//! source attached under `sources`, mirroring an embedded select.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::source::id_of;
use crate::ingest::types::{Source, SourceId};
use crate::store::{Filter, RecordStore, StoreError, TABLE_ARTICLES, TABLE_SOURCES};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Failed to fetch {what}: {source}")]
    Store {
        what: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("article {0} not found")]
    NotFound(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticlePage {
    pub success: bool,
    pub data: Vec<Value>,
    pub count: usize,
    pub filters: ArticleFilter,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceList {
    pub success: bool,
    pub data: Vec<Source>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleStats {
    pub total_articles: usize,
    pub by_source: BTreeMap<String, usize>,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub data: ArticleStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleResponse {
    pub success: bool,
    pub data: Value,
}

fn store_err(what: &'static str) -> impl FnOnce(StoreError) -> QueryError {
    move |source| {
        tracing::error!(target: "articles", what, error = %source, "store query failed");
        QueryError::Store { what, source }
    }
}

fn date_window(mut f: Filter, start: Option<&str>, end: Option<&str>) -> Filter {
    if let Some(s) = start {
        f = f.gte("pub_date", s);
    }
    if let Some(e) = end {
        f = f.lte("pub_date", e);
    }
    f
}

#[derive(Clone)]
pub struct ArticleQueries {
    store: Arc<dyn RecordStore>,
}

impl ArticleQueries {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn source_map(&self) -> Result<HashMap<SourceId, Source>, QueryError> {
        let rows = self
            .store
            .query(TABLE_SOURCES, &Filter::new())
            .await
            .map_err(store_err("sources"))?;
        Ok(rows
            .into_iter()
            .filter_map(|r| serde_json::from_value::<Source>(r).ok())
            .map(|s| (s.id, s))
            .collect())
    }

    /// Attach each row's source under `sources` (null when unresolvable).
    async fn with_sources(&self, mut rows: Vec<Value>) -> Result<Vec<Value>, QueryError> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let sources = self.source_map().await?;
        for row in rows.iter_mut() {
            let src = row
                .get("source_id")
                .and_then(Value::as_i64)
                .and_then(|id| sources.get(&id))
                .and_then(|s| serde_json::to_value(s).ok())
                .unwrap_or(Value::Null);
            if let Value::Object(m) = row {
                m.insert("sources".to_string(), src);
            }
        }
        Ok(rows)
    }

    async fn page(
        &self,
        f: Filter,
        filters: ArticleFilter,
        what: &'static str,
    ) -> Result<ArticlePage, QueryError> {
        let rows = self
            .store
            .query(TABLE_ARTICLES, &f)
            .await
            .map_err(store_err(what))?;
        let data = self.with_sources(rows).await?;
        let count = data.len();
        Ok(ArticlePage {
            success: true,
            pagination: Pagination {
                limit: filters.limit,
                offset: filters.offset,
                has_more: count == filters.limit,
            },
            data,
            count,
            filters,
        })
    }

    /// Newest first by publication date, windowed and paged.
    pub async fn filtered(&self, mut filters: ArticleFilter) -> Result<ArticlePage, QueryError> {
        filters.limit = filters.limit.clamp(1, MAX_PAGE_LIMIT);
        let mut f = date_window(
            Filter::new(),
            filters.start_date.as_deref(),
            filters.end_date.as_deref(),
        );
        if let Some(id) = filters.source_id {
            f = f.eq("source_id", id);
        }
        let f = f
            .order_by("pub_date", true)
            .offset(filters.offset)
            .limit(filters.limit);
        self.page(f, filters, "articles").await
    }

    pub async fn sources(&self) -> Result<SourceList, QueryError> {
        let rows = self
            .store
            .query(TABLE_SOURCES, &Filter::new().order_by("name", false))
            .await
            .map_err(store_err("sources"))?;
        let data: Vec<Source> = rows
            .into_iter()
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect();
        Ok(SourceList {
            success: true,
            count: data.len(),
            data,
        })
    }

    pub async fn stats(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<StatsResponse, QueryError> {
        let rows = self
            .store
            .query(TABLE_ARTICLES, &date_window(Filter::new(), start_date, end_date))
            .await
            .map_err(store_err("articles stats"))?;
        let sources = if rows.is_empty() {
            HashMap::new()
        } else {
            self.source_map().await?
        };

        let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
        for row in &rows {
            let name = row
                .get("source_id")
                .and_then(Value::as_i64)
                .and_then(|id| sources.get(&id))
                .map(|s| s.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            *by_source.entry(name).or_insert(0) += 1;
        }

        Ok(StatsResponse {
            success: true,
            data: ArticleStats {
                total_articles: rows.len(),
                by_source,
                date_range: DateRange {
                    start_date: start_date.unwrap_or("all").to_string(),
                    end_date: end_date.unwrap_or("all").to_string(),
                },
            },
        })
    }

    pub async fn by_id(&self, id: i64) -> Result<ArticleResponse, QueryError> {
        let rows = self
            .store
            .query(TABLE_ARTICLES, &Filter::new().eq("id", id).limit(1))
            .await
            .map_err(store_err("article by id"))?;
        let data = self
            .with_sources(rows)
            .await?
            .into_iter()
            .next()
            .ok_or(QueryError::NotFound(id))?;
        Ok(ArticleResponse {
            success: true,
            data,
        })
    }

    /// Articles of the source(s) named `name`. Unknown name → empty page.
    pub async fn by_source(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<ArticlePage, QueryError> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let filters = ArticleFilter {
            source_name: Some(name.to_string()),
            limit,
            offset,
            ..Default::default()
        };

        let src = self
            .store
            .query(TABLE_SOURCES, &Filter::new().eq("name", name).limit(1))
            .await
            .map_err(store_err("articles by source"))?;
        let Some(source_id) = src.first().and_then(id_of) else {
            return Ok(ArticlePage {
                success: true,
                data: Vec::new(),
                count: 0,
                pagination: Pagination {
                    limit,
                    offset,
                    has_more: false,
                },
                filters,
            });
        };

        let f = Filter::new()
            .eq("source_id", source_id)
            .order_by("pub_date", true)
            .offset(offset)
            .limit(limit);
        self.page(f, filters, "articles by source").await
    }

    pub async fn recent(&self, limit: usize) -> Result<ArticlePage, QueryError> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let filters = ArticleFilter {
            limit,
            offset: 0,
            ..Default::default()
        };
        let f = Filter::new().order_by("pub_date", true).limit(limit);
        let mut page = self.page(f, filters, "recent articles").await?;
        page.pagination.has_more = false;
        Ok(page)
    }
}
