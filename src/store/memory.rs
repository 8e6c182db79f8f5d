// src/store/memory.rs
//! In-process [`RecordStore`] holding JSON rows per table.
//!
//! Rows get an auto-incrementing integer `id`. Unique columns and
//! row-level-security denials can be declared so callers see the same
//! error codes a Postgres-backed store would return.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use super::{
    Filter, Op, RecordStore, StoreError, CODE_INSUFFICIENT_PRIVILEGE, CODE_UNIQUE_VIOLATION,
};

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unique: HashSet<(String, String)>,
    denied: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts that would duplicate a non-null value of `column`.
    pub fn with_unique(mut self, table: &str, column: &str) -> Self {
        self.unique.insert((table.to_string(), column.to_string()));
        self
    }

    /// Fail every write to `table` the way an RLS policy would.
    pub fn deny_writes(mut self, table: &str) -> Self {
        self.denied.insert(table.to_string());
        self
    }

    /// Snapshot of every row in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock()
            .map(|g| g.tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::new("memory store lock poisoned"))
    }

    fn check_write(&self, table: &str) -> Result<(), StoreError> {
        if self.denied.contains(table) {
            return Err(StoreError::with_code(
                CODE_INSUFFICIENT_PRIVILEGE,
                format!("new row violates row-level security policy for table \"{table}\""),
            ));
        }
        Ok(())
    }

    fn check_unique(&self, table: &str, rows: &[Value], record: &Map<String, Value>) -> Result<(), StoreError> {
        for (t, column) in &self.unique {
            if t != table {
                continue;
            }
            let Some(v) = record.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            if rows.iter().any(|r| r.get(column) == Some(v)) {
                return Err(StoreError {
                    code: Some(CODE_UNIQUE_VIOLATION.to_string()),
                    message: format!(
                        "duplicate key value violates unique constraint \"{table}_{column}_key\""
                    ),
                    details: Some(format!("Key ({column})=({v}) already exists.")),
                });
            }
        }
        Ok(())
    }
}

fn as_object(record: Value) -> Result<Map<String, Value>, StoreError> {
    match record {
        Value::Object(m) => Ok(m),
        other => Err(StoreError::new(format!(
            "record must be a JSON object, got {other}"
        ))),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::String(y)) | (Value::String(y), Value::Number(x)) => {
            x.to_string() == *y
        }
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    filter.conditions.iter().all(|c| {
        let Some(v) = row.get(&c.column) else {
            return false;
        };
        match c.op {
            Op::Eq => loose_eq(v, &c.value),
            Op::Gte => matches!(compare(v, &c.value), Some(Ordering::Greater | Ordering::Equal)),
            Op::Lte => matches!(compare(v, &c.value), Some(Ordering::Less | Ordering::Equal)),
        }
    })
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Value, StoreError> {
        self.check_write(table)?;
        let record = as_object(record)?;
        let key = record
            .get(conflict_key)
            .cloned()
            .ok_or_else(|| StoreError::new(format!("upsert record lacks conflict key `{conflict_key}`")))?;

        let mut g = self.lock()?;
        let next = g.next_id + 1;
        let rows = g.tables.entry(table.to_string()).or_default();

        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.get(conflict_key) == Some(&key))
        {
            if let Value::Object(m) = existing {
                for (k, v) in record {
                    if k != "id" {
                        m.insert(k, v);
                    }
                }
            }
            return Ok(existing.clone());
        }

        let mut row = record;
        row.insert("id".to_string(), Value::from(next));
        let row = Value::Object(row);
        rows.push(row.clone());
        g.next_id = next;
        Ok(row)
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Value, StoreError> {
        self.check_write(table)?;
        let mut record = as_object(record)?;

        let mut g = self.lock()?;
        let next = g.next_id + 1;
        {
            let rows = g.tables.get(table).map(Vec::as_slice).unwrap_or_default();
            self.check_unique(table, rows, &record)?;
        }
        record.insert("id".to_string(), Value::from(next));
        let row = Value::Object(record);
        g.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        g.next_id = next;
        Ok(row)
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let g = self.lock()?;
        let mut out: Vec<Value> = g
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, filter)).cloned().collect())
            .unwrap_or_default();
        drop(g);

        if let Some(order) = &filter.order {
            out.sort_by(|a, b| {
                let (va, vb) = (a.get(&order.column), b.get(&order.column));
                // nulls sort last in both directions
                match (va.filter(|v| !v.is_null()), vb.filter(|v| !v.is_null())) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) => {
                        let o = compare(x, y).unwrap_or(Ordering::Equal);
                        if order.descending {
                            o.reverse()
                        } else {
                            o
                        }
                    }
                }
            });
        }

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_keeps_id_and_refreshes_fields() {
        let store = MemoryStore::new();
        let a = store
            .upsert("sources", json!({"name": "A", "url": "https://a", "weight": 1.0}), "url")
            .await
            .unwrap();
        let b = store
            .upsert("sources", json!({"name": "A2", "url": "https://a", "weight": 0.5}), "url")
            .await
            .unwrap();
        assert_eq!(a["id"], b["id"]);
        assert_eq!(b["name"], "A2");
        assert_eq!(store.len("sources"), 1);
    }

    #[tokio::test]
    async fn unique_column_rejects_duplicate_insert() {
        let store = MemoryStore::new().with_unique("articles", "guid");
        store.insert("articles", json!({"guid": "g1"})).await.unwrap();
        store.insert("articles", json!({"guid": null})).await.unwrap();
        store.insert("articles", json!({"guid": null})).await.unwrap();
        let err = store
            .insert("articles", json!({"guid": "g1"}))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.len("articles"), 3);
    }

    #[tokio::test]
    async fn denied_table_reports_policy_violation() {
        let store = MemoryStore::new().deny_writes("sources");
        let err = store
            .upsert("sources", json!({"url": "https://a"}), "url")
            .await
            .unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn query_filters_orders_and_pages() {
        let store = MemoryStore::new();
        for (i, d) in ["2024-01-03", "2024-01-01", "2024-01-02"].iter().enumerate() {
            store
                .insert("articles", json!({"n": i, "pub_date": d, "source_id": 1}))
                .await
                .unwrap();
        }
        store
            .insert("articles", json!({"n": 9, "pub_date": null, "source_id": 2}))
            .await
            .unwrap();

        let f = Filter::new()
            .eq("source_id", "1")
            .gte("pub_date", "2024-01-02")
            .order_by("pub_date", true);
        let rows = store.query("articles", &f).await.unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r["pub_date"].clone()).collect();
        assert_eq!(dates, vec![json!("2024-01-03"), json!("2024-01-02")]);

        let all = Filter::new().order_by("pub_date", true).offset(1).limit(2);
        let page = store.query("articles", &all).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["pub_date"], "2024-01-02");

        assert!(store.exists("articles", &Filter::new().eq("n", 9)).await.unwrap());
        assert!(!store.exists("articles", &Filter::new().eq("n", 42)).await.unwrap());
    }
}
