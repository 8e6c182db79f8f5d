// src/config/mod.rs
//! Process configuration read once at startup and passed down explicitly.

use anyhow::{anyhow, Result};
use std::time::Duration;

pub const ENV_STORE_URL: &str = "SUPABASE_URL";
pub const ENV_STORE_SERVICE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_STORE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

pub const ENV_DEADLINE_SECS: &str = "INGEST_DEADLINE_SECS";
pub const ENV_CONCURRENCY: &str = "INGEST_CONCURRENCY";
pub const ENV_MAX_MARKUP_CHARS: &str = "INGEST_MAX_MARKUP_CHARS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "INGEST_HTTP_TIMEOUT_SECS";

pub const DEFAULT_MAX_MARKUP_CHARS: usize = 500_000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Store endpoint + credential. Missing values are a startup failure.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub timeout_secs: u64,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Service-role key wins over the anon key.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let url = non_empty(ENV_STORE_URL);
        let key = non_empty(ENV_STORE_SERVICE_KEY).or_else(|| non_empty(ENV_STORE_ANON_KEY));
        match (url, key) {
            (Some(url), Some(key)) => Ok(Self {
                url,
                key,
                timeout_secs: parse_env(non_empty(ENV_HTTP_TIMEOUT_SECS))
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            }),
            _ => Err(anyhow!(
                "Missing {ENV_STORE_URL} or {ENV_STORE_SERVICE_KEY}/{ENV_STORE_ANON_KEY}"
            )),
        }
    }
}

/// Knobs for a single ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Overall run deadline; `None` = unbounded.
    pub deadline: Option<Duration>,
    /// Items processed in flight at once. 1 = strictly sequential, feed order.
    pub concurrency: usize,
    /// Cap on markup characters handed to the normalizer per item.
    pub max_markup_chars: usize,
    pub http_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            concurrency: 1,
            max_markup_chars: DEFAULT_MAX_MARKUP_CHARS,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl IngestOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Self {
            deadline: parse_env::<u64>(get(ENV_DEADLINE_SECS))
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            concurrency: parse_env::<usize>(get(ENV_CONCURRENCY))
                .map(|n| n.clamp(1, 64))
                .unwrap_or(d.concurrency),
            max_markup_chars: parse_env::<usize>(get(ENV_MAX_MARKUP_CHARS))
                .filter(|n| *n > 0)
                .unwrap_or(d.max_markup_chars),
            http_timeout: parse_env::<u64>(get(ENV_HTTP_TIMEOUT_SECS))
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.http_timeout),
        }
    }
}

fn parse_env<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse::<T>().ok())
}
