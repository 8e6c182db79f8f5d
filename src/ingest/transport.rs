// src/ingest/transport.rs
//! Feed transport seam: one GET, full body as text, no retries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::ingest::error::FetchError;

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
    fn name(&self) -> &'static str;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let rsp = match self.client.get(url).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::warn!(error = ?e, url, "feed http error");
                return Err(e.into());
            }
        };
        let status = rsp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(rsp.text().await?)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

enum Canned {
    Body(String),
    Status(u16),
    File(PathBuf),
}

/// Serves canned documents by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct FixtureTransport {
    routes: Mutex<HashMap<String, Canned>>,
    latency: Option<Duration>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(self, url: &str, c: Canned) -> Self {
        if let Ok(mut r) = self.routes.lock() {
            r.insert(url.to_string(), c);
        }
        self
    }

    /// Sleep this long before answering any fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_body(self, url: &str, body: impl Into<String>) -> Self {
        self.put(url, Canned::Body(body.into()))
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.put(url, Canned::Status(status))
    }

    /// Read the document from disk on each fetch.
    pub fn with_file(self, url: &str, path: impl Into<PathBuf>) -> Self {
        self.put(url, Canned::File(path.into()))
    }

    /// Replace the body served for `url` (e.g. between two runs).
    pub fn set_body(&self, url: &str, body: impl Into<String>) {
        if let Ok(mut r) = self.routes.lock() {
            r.insert(url.to_string(), Canned::Body(body.into()));
        }
    }
}

#[async_trait]
impl FeedTransport for FixtureTransport {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        let path = {
            let routes = self
                .routes
                .lock()
                .map_err(|_| FetchError::Status(500))?;
            match routes.get(url) {
                Some(Canned::Body(b)) => return Ok(b.clone()),
                Some(Canned::Status(s)) => return Err(FetchError::Status(*s)),
                Some(Canned::File(p)) => p.clone(),
                None => return Err(FetchError::Status(404)),
            }
        };
        Ok(tokio::fs::read_to_string(path).await?)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
