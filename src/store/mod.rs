//! Document store contract.
//!
//! Everything the application persists goes through this trait: point
//! reads, point writes/patches, filtered queries and live
//! subscriptions. Any backend with those four capabilities satisfies
//! it; the bundled implementation is [`SqliteStore`].

use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod sqlite;

pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("document payload must be a JSON object")]
    InvalidDocument,

    #[error("failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// One record: the store-assigned id plus the stored JSON object
/// (which also carries `id` as a field).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    /// Deserialize into a typed record shape.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut fields = self.fields.clone();
        if let Value::Object(map) = &mut fields {
            map.entry("id".to_string())
                .or_insert_with(|| Value::String(self.id.clone()));
        }
        Ok(serde_json::from_value(fields)?)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ge,
    Lt,
}

/// A single field comparison, `field <op> value`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ge,
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lt,
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.field(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ge => {
                matches!(compare_values(actual, &self.value), Some(ord) if ord.is_ge())
            }
            FilterOp::Lt => {
                matches!(compare_values(actual, &self.value), Some(ord) if ord.is_lt())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Filters, ordering and a limit for [`DocumentStore::query`] and
/// [`DocumentStore::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }
}

/// Order two JSON scalars. RFC3339 strings are compared as instants
/// because chrono's serde output has variable fractional precision,
/// which would misorder under plain lexicographic comparison.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().and_then(|x| y.as_f64().and_then(|y| x.partial_cmp(&y)))
        }
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(tx), Ok(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

/// A live query. The current result set is delivered immediately and
/// again after every change to the collection; dropping the handle
/// cancels the feed.
pub struct Subscription {
    pub(crate) receiver: mpsc::Receiver<Vec<Document>>,
    pub(crate) cancel: CancellationToken,
}

impl Subscription {
    /// Next result set, or `None` once the feed has been cancelled.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when the record does not exist.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Insert with a store-generated id; returns the id. The id is also
    /// injected into the stored object under `id`.
    async fn create(&self, collection: &str, fields: Value) -> StoreResult<String>;

    /// Write the full record under a caller-chosen id, replacing any
    /// previous contents.
    async fn put(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()>;

    /// Atomic top-level merge of `fields` into an existing record.
    /// Fails with [`StoreError::NotFound`] if the record is absent.
    async fn patch(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()>;

    /// Filtered, ordered, limited list.
    async fn query(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>>;

    /// Live stream of query results; see [`Subscription`].
    async fn subscribe(&self, collection: &str, query: Query) -> StoreResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document {
            id: "d1".into(),
            fields,
        }
    }

    #[test]
    fn eq_filter_matches_exact_value() {
        let d = doc(json!({"status": "completed", "count": 3}));
        assert!(Filter::eq("status", "completed").matches(&d));
        assert!(!Filter::eq("status", "active").matches(&d));
        assert!(!Filter::eq("missing", "x").matches(&d));
    }

    #[test]
    fn range_filters_compare_timestamps_not_strings() {
        // Lexicographically "...11.5Z" < "...11Z", but as instants the
        // fractional one is later.
        let d = doc(json!({"completedAt": "2026-08-02T09:10:11.500Z"}));
        assert!(Filter::ge("completedAt", "2026-08-02T09:10:11Z").matches(&d));
        assert!(Filter::lt("completedAt", "2026-08-02T09:10:12Z").matches(&d));
        assert!(!Filter::lt("completedAt", "2026-08-02T09:10:11Z").matches(&d));
    }

    #[test]
    fn decode_injects_id_when_absent() {
        #[derive(serde::Deserialize)]
        struct Rec {
            id: String,
            n: u32,
        }
        let d = doc(json!({"n": 7}));
        let rec: Rec = d.decode().unwrap();
        assert_eq!(rec.id, "d1");
        assert_eq!(rec.n, 7);
    }
}
