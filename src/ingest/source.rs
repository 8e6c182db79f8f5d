// src/ingest/source.rs
//! Source registration: idempotent upsert keyed on the canonical URL.

use serde_json::{json, Value};

use crate::ingest::error::RegistrationError;
use crate::ingest::types::{SourceDescriptor, SourceId};
use crate::store::{RecordStore, TABLE_SOURCES};

pub const SOURCE_CONFLICT_KEY: &str = "url";

/// Ensure the publisher row exists and return its durable id.
///
/// An existing row keeps its id; name and weight are refreshed by the
/// upsert. Access-policy denials are reported with an operator hint but
/// fail the same way as any other store error.
pub async fn ensure_source(
    store: &dyn RecordStore,
    desc: &SourceDescriptor,
) -> Result<SourceId, RegistrationError> {
    let record = json!({
        "name": desc.name,
        "url": desc.url,
        "weight": desc.weight,
    });

    let row = match store.upsert(TABLE_SOURCES, record, SOURCE_CONFLICT_KEY).await {
        Ok(row) => row,
        Err(e) if e.is_policy_violation() => {
            tracing::error!(
                target: "ingest",
                table = TABLE_SOURCES,
                url = %desc.url,
                error = %e,
                "RLS error upserting source; check the row-level security policies for the \"sources\" table"
            );
            return Err(RegistrationError::PolicyDenied(e));
        }
        Err(e) => {
            tracing::warn!(target: "ingest", url = %desc.url, error = %e, "source upsert failed");
            return Err(RegistrationError::Store(e));
        }
    };

    id_of(&row).ok_or(RegistrationError::MissingId)
}

/// Integer `id`, tolerating stores that render it as a string.
pub(crate) fn id_of(row: &Value) -> Option<SourceId> {
    match row.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn coindesk() -> SourceDescriptor {
        SourceDescriptor {
            name: "CoinDesk".into(),
            url: "https://www.coindesk.com".into(),
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn second_registration_returns_same_id() {
        let store = MemoryStore::new();
        let a = ensure_source(&store, &coindesk()).await.unwrap();
        let mut renamed = coindesk();
        renamed.name = "CoinDesk News".into();
        renamed.weight = 0.8;
        let b = ensure_source(&store, &renamed).await.unwrap();
        assert_eq!(a, b);

        let rows = store.rows(TABLE_SOURCES);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "CoinDesk News");
    }

    #[tokio::test]
    async fn policy_denial_is_distinguished() {
        let store = MemoryStore::new().deny_writes(TABLE_SOURCES);
        let err = ensure_source(&store, &coindesk()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::PolicyDenied(_)));
    }

    #[test]
    fn id_accepts_numbers_and_numeric_strings() {
        assert_eq!(id_of(&json!({"id": 4})), Some(4));
        assert_eq!(id_of(&json!({"id": "12"})), Some(12));
        assert_eq!(id_of(&json!({"id": null})), None);
        assert_eq!(id_of(&json!({})), None);
    }
}
