// src/ingest/error.rs
//! Run-fatal and item-level error taxonomy.

use thiserror::Error;

use crate::ingest::types::IngestionResult;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("source upsert denied by access policy: {0}")]
    PolicyDenied(#[source] StoreError),
    #[error("source upsert failed: {0}")]
    Store(#[source] StoreError),
    #[error("source upsert returned no usable id")]
    MissingId,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("reading feed fixture: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("malformed feed: {0}")]
pub struct MalformedFeedError(pub String);

/// Failure confined to one feed item; recorded, never propagated.
#[derive(Debug, Error)]
pub enum ItemProcessingError {
    #[error("existence check failed: {0}")]
    ExistenceCheck(#[source] StoreError),
    #[error("insert failed: {0}")]
    Insert(#[source] StoreError),
    #[error("encoding article: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    MalformedFeed(#[from] MalformedFeedError),
    /// Deadline hit; `partial` holds every outcome completed before expiry.
    /// `remaining` is `None` when the deadline fired before parsing.
    #[error("ingestion deadline exceeded{}", unprocessed(.remaining))]
    Timeout {
        partial: Box<IngestionResult>,
        remaining: Option<usize>,
    },
}

fn unprocessed(remaining: &Option<usize>) -> String {
    remaining
        .map(|n| format!(" with {n} item(s) unprocessed"))
        .unwrap_or_default()
}

impl IngestError {
    /// Short machine-readable kind for API responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Registration(_) => "registration",
            IngestError::Fetch(_) => "fetch",
            IngestError::MalformedFeed(_) => "malformed_feed",
            IngestError::Timeout { .. } => "timeout",
        }
    }
}
