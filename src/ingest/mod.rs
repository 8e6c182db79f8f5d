// src/ingest/mod.rs
//! Feed ingestion: register source → fetch → parse → per item
//! (normalize, fingerprint, dedup gate, insert) → aggregated result.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod parser;
pub mod scheduler;
pub mod source;
pub mod transport;
pub mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tokio::time::{error::Elapsed, Instant};

use crate::config::IngestOptions;
use crate::ingest::error::{IngestError, ItemProcessingError};
use crate::ingest::fingerprint::fingerprint;
use crate::ingest::normalize::{normalize_text, truncate_chars};
use crate::ingest::parser::{parse_feed, parse_pub_date};
use crate::ingest::source::ensure_source;
use crate::ingest::transport::FeedTransport;
use crate::ingest::types::{
    Article, FeedDescriptor, IngestionResult, ItemFailure, RawFeedItem, SourceId,
};
use crate::store::{Filter, RecordStore, TABLE_ARTICLES};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Ingestion runs started.");
        describe_counter!("ingest_inserted_total", "Articles inserted.");
        describe_counter!(
            "ingest_skipped_total",
            "Items skipped because their guid already exists."
        );
        describe_counter!("ingest_item_errors_total", "Items that failed processing.");
        describe_counter!(
            "ingest_run_errors_total",
            "Runs aborted by registration, fetch, parse or deadline errors."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when an ingestion run last finished.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Inserted,
    SkippedExisting,
}

/// Per-run state shared by every item of the batch.
struct RunContext {
    source_id: SourceId,
    feed_language: Option<String>,
    /// One gate per guid in this document. The flag is set once a copy stored
    /// or found the article; later copies wait on the gate and skip, or retry
    /// when the earlier copy failed.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<bool>>>>,
}

impl RunContext {
    fn new(source_id: SourceId, feed_language: Option<String>) -> Self {
        Self {
            source_id,
            feed_language,
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, guid: &str) -> Arc<tokio::sync::Mutex<bool>> {
        match self.gates.lock() {
            Ok(mut gates) => gates.entry(guid.to_string()).or_default().clone(),
            // A poisoned map only loses in-run ordering; the store check still runs.
            Err(_) => Arc::default(),
        }
    }
}

/// Content markup priority: `content:encoded`, `content`, then description.
pub fn resolve_content(item: &RawFeedItem) -> &str {
    item.content
        .as_deref()
        .or(item.description.as_deref())
        .unwrap_or_default()
}

/// Map one parsed item to the row that will be inserted.
pub fn build_article(
    source_id: SourceId,
    feed_language: Option<&str>,
    item: &RawFeedItem,
    max_markup_chars: usize,
    now: DateTime<Utc>,
) -> Article {
    let content_html = truncate_chars(resolve_content(item), max_markup_chars).to_string();
    let content_text = normalize_text(&content_html);
    let hash = fingerprint(&[
        item.guid.as_deref(),
        item.link.as_deref(),
        item.title.as_deref(),
        Some(content_text.as_str()),
    ]);

    Article {
        source_id,
        guid: item.guid.clone(),
        link: item.link.clone(),
        title: item.title.clone(),
        description: item.description.clone(),
        content_html,
        content_text,
        author: item.author.clone(),
        categories: item.categories.clone(),
        pub_date: item.pub_date.as_deref().and_then(parse_pub_date),
        feed_language: feed_language.map(str::to_string),
        hash,
        first_seen_at: now,
    }
}

async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output, Elapsed> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await,
        None => Ok(fut.await),
    }
}

fn record(result: &mut IngestionResult, guid: Option<String>, outcome: Result<ItemOutcome, ItemProcessingError>) {
    match outcome {
        Ok(ItemOutcome::Inserted) => result.inserted += 1,
        Ok(ItemOutcome::SkippedExisting) => result.skipped_existing += 1,
        Err(e) => {
            tracing::warn!(target: "ingest", guid = ?guid, error = %e, "failed to insert item");
            result.errors.push(ItemFailure {
                guid,
                error: e.to_string(),
            });
        }
    }
}

pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn FeedTransport>,
    opts: IngestOptions,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn FeedTransport>,
        opts: IngestOptions,
    ) -> Self {
        Self {
            store,
            transport,
            opts,
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    /// Run one best-effort pass over `feed`.
    ///
    /// Registration, fetch and parse failures abort the run. Item failures
    /// are recorded in the result and never stop the batch. If the options
    /// carry a deadline and it expires, the partial result travels inside
    /// [`IngestError::Timeout`].
    pub async fn ingest(&self, feed: &FeedDescriptor) -> Result<IngestionResult, IngestError> {
        ensure_metrics_described();
        counter!("ingest_runs_total").increment(1);

        let deadline = self.opts.deadline.map(|d| Instant::now() + d);
        let outcome = self.run(feed, deadline).await;

        gauge!("ingest_last_run_ts").set(Utc::now().timestamp().max(0) as f64);
        match &outcome {
            Ok(r) => {
                counter!("ingest_inserted_total").increment(r.inserted as u64);
                counter!("ingest_skipped_total").increment(r.skipped_existing as u64);
                counter!("ingest_item_errors_total").increment(r.errors.len() as u64);
                tracing::info!(
                    target: "ingest",
                    feed = %feed.name,
                    source_id = ?r.source_id,
                    inserted = r.inserted,
                    skipped = r.skipped_existing,
                    errors = r.errors.len(),
                    "ingest run finished"
                );
            }
            Err(e) => {
                counter!("ingest_run_errors_total", "kind" => e.kind()).increment(1);
                tracing::warn!(target: "ingest", feed = %feed.name, kind = e.kind(), error = %e, "ingest run aborted");
            }
        }
        outcome
    }

    async fn run(
        &self,
        feed: &FeedDescriptor,
        deadline: Option<Instant>,
    ) -> Result<IngestionResult, IngestError> {
        let mut result = IngestionResult::default();
        let timed_out = |partial: &IngestionResult, remaining: Option<usize>| IngestError::Timeout {
            partial: Box::new(partial.clone()),
            remaining,
        };

        // 1) Source first; every insert needs its id
        let source_id = within(deadline, ensure_source(self.store.as_ref(), &feed.source))
            .await
            .map_err(|_| timed_out(&result, None))??;
        result.source_id = Some(source_id);
        result.upserted_sources = 1;

        // 2) Fetch
        let body = within(deadline, self.transport.fetch(&feed.feed_url))
            .await
            .map_err(|_| timed_out(&result, None))??;

        // 3) Parse
        let parsed = parse_feed(&body)?;
        let total = parsed.items.len();
        tracing::debug!(target: "ingest", feed = %feed.name, items = total, transport = self.transport.name(), "feed parsed");

        let ctx = RunContext::new(source_id, parsed.language);

        // 4) Items: fan out, fold outcomes in a single collector
        let mut outcomes = std::pin::pin!(futures::stream::iter(parsed.items)
            .map(|item| self.process_item(&ctx, item))
            .buffer_unordered(self.opts.concurrency.max(1)));

        let mut done = 0usize;
        loop {
            match within(deadline, outcomes.next()).await {
                Ok(Some((guid, outcome))) => {
                    record(&mut result, guid, outcome);
                    done += 1;
                }
                Ok(None) => break,
                Err(_) => return Err(timed_out(&result, Some(total - done))),
            }
        }

        Ok(result)
    }

    async fn process_item(
        &self,
        ctx: &RunContext,
        item: RawFeedItem,
    ) -> (Option<String>, Result<ItemOutcome, ItemProcessingError>) {
        let guid = item.guid.clone();
        let outcome = self.try_item(ctx, &item).await;
        (guid, outcome)
    }

    async fn try_item(
        &self,
        ctx: &RunContext,
        item: &RawFeedItem,
    ) -> Result<ItemOutcome, ItemProcessingError> {
        let article = build_article(
            ctx.source_id,
            ctx.feed_language.as_deref(),
            item,
            self.opts.max_markup_chars,
            Utc::now(),
        );

        // Dedup gate: guid-less items always go to insert
        let Some(guid) = article.guid.as_deref() else {
            return self.insert_article(&article).await;
        };
        let gate = ctx.gate(guid);
        let mut settled = gate.lock().await;
        if *settled {
            return Ok(ItemOutcome::SkippedExisting);
        }

        let exists = self
            .store
            .exists(TABLE_ARTICLES, &Filter::new().eq("guid", guid))
            .await
            .map_err(ItemProcessingError::ExistenceCheck)?;
        let outcome = if exists {
            ItemOutcome::SkippedExisting
        } else {
            self.insert_article(&article).await?
        };
        *settled = true;
        Ok(outcome)
    }

    async fn insert_article(&self, article: &Article) -> Result<ItemOutcome, ItemProcessingError> {
        let row = serde_json::to_value(article)?;
        match self.store.insert(TABLE_ARTICLES, row).await {
            Ok(_) => Ok(ItemOutcome::Inserted),
            // A concurrent run won the race for this guid
            Err(e) if e.is_unique_violation() => Ok(ItemOutcome::SkippedExisting),
            Err(e) => Err(ItemProcessingError::Insert(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> RawFeedItem {
        RawFeedItem {
            guid: Some("g1".into()),
            link: Some("https://x/a".into()),
            title: Some("Title".into()),
            description: Some("<p>Desc</p>".into()),
            ..Default::default()
        }
    }

    #[test]
    fn content_falls_back_to_description_then_empty() {
        let mut it = item();
        assert_eq!(resolve_content(&it), "<p>Desc</p>");
        it.content = Some("<p>Full</p>".into());
        assert_eq!(resolve_content(&it), "<p>Full</p>");
        it.content = None;
        it.description = None;
        assert_eq!(resolve_content(&it), "");
    }

    #[test]
    fn article_mapping_keeps_nulls_and_parses_dates() {
        let now = Utc::now();
        let mut it = item();
        it.pub_date = Some("not a date".into());
        let a = build_article(3, Some("en"), &it, 1_000, now);
        assert_eq!(a.source_id, 3);
        assert_eq!(a.content_text, "Desc");
        assert_eq!(a.pub_date, None);
        assert_eq!(a.categories, None);
        assert_eq!(a.author, None);
        assert_eq!(a.feed_language.as_deref(), Some("en"));
        assert_eq!(a.first_seen_at, now);
        assert_eq!(
            a.hash,
            fingerprint(&[Some("g1"), Some("https://x/a"), Some("Title"), Some("Desc")])
        );

        it.pub_date = Some("Mon, 02 Jun 2025 08:30:00 GMT".into());
        let b = build_article(3, None, &it, 1_000, now);
        assert_eq!(
            b.pub_date.map(|d| d.to_rfc3339()),
            Some("2025-06-02T08:30:00+00:00".to_string())
        );
    }

    #[test]
    fn markup_is_capped_before_normalizing() {
        let mut it = item();
        it.content = Some("a".repeat(50));
        let a = build_article(1, None, &it, 10, Utc::now());
        assert_eq!(a.content_html.len(), 10);
        assert_eq!(a.content_text, "a".repeat(10));
    }

    #[tokio::test]
    async fn same_guid_shares_one_gate() {
        let ctx = RunContext::new(1, None);
        let a = ctx.gate("g");
        assert!(Arc::ptr_eq(&a, &ctx.gate("g")));
        assert!(!Arc::ptr_eq(&a, &ctx.gate("h")));

        // unsettled until a copy succeeds
        assert!(!*a.lock().await);
        *a.lock().await = true;
        assert!(*ctx.gate("g").lock().await);
    }
}
