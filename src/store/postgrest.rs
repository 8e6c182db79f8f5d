// src/store/postgrest.rs
//! [`RecordStore`] backed by a PostgREST endpoint (Supabase `rest/v1`).

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use super::{Filter, RecordStore, StoreError};
use crate::config::StoreConfig;

#[derive(Clone)]
pub struct PostgrestStore {
    base: String,
    key: String,
    client: Client,
}

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl PostgrestStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("news-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| StoreError::new(format!("building store http client: {e}")))?;
        Ok(Self {
            base: cfg.url.trim_end_matches('/').to_string(),
            key: cfg.key.clone(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base, table)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.key))
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Value, StoreError> {
        let rsp = rb
            .send()
            .await
            .map_err(|e| StoreError::new(format!("store request failed: {e}")))?;
        decode(rsp).await
    }
}

/// Query-string pairs for a filter, in PostgREST's `col=op.value` syntax.
pub(crate) fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter
        .conditions
        .iter()
        .map(|c| {
            let v = match &c.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (c.column.clone(), format!("{}.{}", c.op.as_str(), v))
        })
        .collect();
    if let Some(o) = &filter.order {
        let dir = if o.descending { "desc" } else { "asc" };
        // nulls last in both directions, matching MemoryStore
        params.push(("order".into(), format!("{}.{}.nullslast", o.column, dir)));
    }
    if let Some(n) = filter.limit {
        params.push(("limit".into(), n.to_string()));
    }
    if let Some(n) = filter.offset {
        params.push(("offset".into(), n.to_string()));
    }
    params
}

async fn decode(rsp: Response) -> Result<Value, StoreError> {
    let status = rsp.status();
    let text = rsp
        .text()
        .await
        .map_err(|e| StoreError::new(format!("reading store response: {e}")))?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(b) => StoreError {
                code: b.code,
                message: b
                    .message
                    .unwrap_or_else(|| format!("store returned HTTP {status}")),
                details: b.details.or(b.hint),
            },
            Err(_) => StoreError {
                code: None,
                message: format!("store returned HTTP {status}"),
                details: Some(text).filter(|t| !t.is_empty()),
            },
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    serde_json::from_str(&text).map_err(|e| StoreError::new(format!("decoding store response: {e}")))
}

/// `return=representation` yields an array with the written row.
fn first_row(v: Value) -> Result<Value, StoreError> {
    match v {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        Value::Array(_) => Err(StoreError::new("store returned no row for write")),
        other => Ok(other),
    }
}

/// Reads always answer with a JSON array of rows.
fn rows_of(v: Value, what: &str) -> Result<Vec<Value>, StoreError> {
    match v {
        Value::Array(rows) => Ok(rows),
        other => Err(StoreError::new(format!(
            "expected array from store {what}, got {other}"
        ))),
    }
}

#[async_trait::async_trait]
impl RecordStore for PostgrestStore {
    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Value, StoreError> {
        let rb = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&record);
        first_row(self.send(self.authed(rb)).await?)
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Value, StoreError> {
        let rb = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&record);
        first_row(self.send(self.authed(rb)).await?)
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(filter));
        let rb = self.client.get(self.table_url(table)).query(&params);
        rows_of(self.send(self.authed(rb)).await?, "query")
    }

    async fn exists(&self, table: &str, filter: &Filter) -> Result<bool, StoreError> {
        let mut params = vec![("select".to_string(), "id".to_string())];
        params.extend(filter_params(&filter.clone().limit(1)));
        let rb = self.client.get(self.table_url(table)).query(&params);
        let rows = rows_of(self.send(self.authed(rb)).await?, "existence check")?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_params_use_postgrest_syntax() {
        let f = Filter::new()
            .eq("guid", "abc")
            .gte("pub_date", "2024-01-01T00:00:00Z")
            .eq("source_id", 7)
            .order_by("pub_date", true)
            .limit(50)
            .offset(100);
        let p = filter_params(&f);
        assert_eq!(
            p,
            vec![
                ("guid".to_string(), "eq.abc".to_string()),
                ("pub_date".to_string(), "gte.2024-01-01T00:00:00Z".to_string()),
                ("source_id".to_string(), "eq.7".to_string()),
                ("order".to_string(), "pub_date.desc.nullslast".to_string()),
                ("limit".to_string(), "50".to_string()),
                ("offset".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn non_array_read_reply_is_an_error() {
        let err = rows_of(serde_json::json!({"id": 1}), "existence check").unwrap_err();
        assert!(err.message.contains("expected array from store existence check"));
        assert!(rows_of(serde_json::json!(null), "query").is_err());

        assert!(rows_of(serde_json::json!([]), "existence check").unwrap().is_empty());
        assert_eq!(rows_of(serde_json::json!([{"id": 3}]), "query").unwrap().len(), 1);
    }

    #[test]
    fn first_row_unwraps_representation() {
        let v = serde_json::json!([{"id": 3}]);
        assert_eq!(first_row(v).unwrap()["id"], 3);
        assert!(first_row(serde_json::json!([])).is_err());
    }
}
