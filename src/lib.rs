// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod articles;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::ingest::error::IngestError;
pub use crate::ingest::types::{FeedDescriptor, IngestionResult, SourceDescriptor};
pub use crate::ingest::Ingestor;
pub use crate::store::{MemoryStore, PostgrestStore, RecordStore};
