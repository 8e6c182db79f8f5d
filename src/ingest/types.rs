// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned durable identifier of a source row.
pub type SourceId = i64;

fn default_weight() -> f64 {
    1.0
}

/// Publisher identity; `url` is the upsert key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Persisted source row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// One configured feed: route slug, document URL and its publisher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedDescriptor {
    pub name: String,
    pub feed_url: String,
    pub source: SourceDescriptor,
}

/// Media attachment metadata (captured, not persisted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaAttachment {
    pub url: Option<String>,
    pub media_type: Option<String>,
    pub medium: Option<String>,
}

/// One entry as parsed from the feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeedItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// `content:encoded`, then `content`. Description fallback happens later.
    pub content: Option<String>,
    pub pub_date: Option<String>,
    pub author: Option<String>,
    /// `None` = the item declared no category element at all.
    pub categories: Option<Vec<String>>,
    pub media: Vec<MediaAttachment>,
}

/// Parser output: items in document order plus the channel language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub items: Vec<RawFeedItem>,
    pub language: Option<String>,
}

/// Durable article row as written to the `articles` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub source_id: SourceId,
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_html: String,
    pub content_text: String,
    pub author: Option<String>,
    pub categories: Option<Vec<String>>,
    pub pub_date: Option<DateTime<Utc>>,
    pub feed_language: Option<String>,
    pub hash: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guid: Option<String>,
    pub error: String,
}

/// Per-run summary returned to the caller. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub source_id: Option<SourceId>,
    pub upserted_sources: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub errors: Vec<ItemFailure>,
}

impl IngestionResult {
    /// Items with a recorded outcome (inserted, skipped or failed).
    pub fn processed(&self) -> usize {
        self.inserted + self.skipped_existing + self.errors.len()
    }
}
