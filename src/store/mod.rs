// src/store/mod.rs
//! Record-oriented persistent store seam.
//!
//! The pipeline only ever talks to a [`RecordStore`]: remote, fallible and
//! latency-bearing. No call spans more than one record operation, so nothing
//! here assumes transactions.

pub mod memory;
pub mod postgrest;

use serde_json::Value;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

pub const TABLE_SOURCES: &str = "sources";
pub const TABLE_ARTICLES: &str = "articles";

/// Postgres SQLSTATE for `insufficient_privilege` (raised by RLS policies).
pub const CODE_INSUFFICIENT_PRIVILEGE: &str = "42501";
/// Postgres SQLSTATE for `unique_violation`.
pub const CODE_UNIQUE_VIOLATION: &str = "23505";

/// Structured error returned by the store, carrying its machine-readable code.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{message}{}", code_suffix(.code))]
pub struct StoreError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" (code {c})"))
        .unwrap_or_default()
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            details: None,
        }
    }

    /// Row-level-security (or similar access policy) rejection.
    pub fn is_policy_violation(&self) -> bool {
        self.code.as_deref() == Some(CODE_INSUFFICIENT_PRIVILEGE)
            && self.message.to_ascii_lowercase().contains("row-level security")
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(CODE_UNIQUE_VIOLATION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Gte => "gte",
            Op::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Conjunctive row filter with optional ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Eq, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Gte, value)
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Lte, value)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }
}

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or merge `record`, keyed on `conflict_key`. Returns the stored row.
    async fn upsert(&self, table: &str, record: Value, conflict_key: &str)
        -> Result<Value, StoreError>;

    /// Plain insert. Returns the stored row.
    async fn insert(&self, table: &str, record: Value) -> Result<Value, StoreError>;

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// At-most-one lookup.
    async fn exists(&self, table: &str, filter: &Filter) -> Result<bool, StoreError> {
        let limited = filter.clone().limit(1);
        Ok(!self.query(table, &limited).await?.is_empty())
    }
}
