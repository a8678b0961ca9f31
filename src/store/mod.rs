//! Document store collaborator.
//!
//! A remote key/document database addressed by `(collection, id)`. Every
//! write bumps a per-document version so that caches can discard stale
//! change notifications.

mod memory;
mod postgres;

pub use memory::InMemoryDocumentStore;
pub use postgres::PgDocumentStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub type Document = Value;

pub const CARTS: &str = "carts";
pub const ORDERS: &str = "orders";
pub const ITEMS: &str = "items";
pub const ORDER_COUNTER: &str = "orderCounter";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self { Self::Serde(e.to_string()) }
}

/// A document as read from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub version: u64,
    pub data: Document,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Query predicate over top-level document fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    FieldEq { field: String, value: Value },
}

impl Filter {
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEq { field: field.into(), value: value.into() }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::FieldEq { field, value } => doc.get(field) == Some(value),
        }
    }
}

/// One write inside an atomic batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Set { collection: String, id: String, data: Document },
    Update { collection: String, id: String, patch: Document },
}

impl Write {
    pub fn set(collection: &str, id: impl Into<String>, data: Document) -> Self {
        Self::Set { collection: collection.to_string(), id: id.into(), data }
    }

    pub fn update(collection: &str, id: impl Into<String>, patch: Document) -> Self {
        Self::Update { collection: collection.to_string(), id: id.into(), patch }
    }
}

/// Each item is the full set of documents matching the subscription filter.
/// Dropping the receiver unsubscribes.
pub type ChangeStream = mpsc::UnboundedReceiver<Result<Vec<Snapshot>, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Creates or replaces a document. Returns the new version.
    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<u64, StoreError>;

    /// Merges top-level fields of `patch` into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<u64, StoreError>;

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Snapshot>, StoreError>;

    /// Delivers the current matching set immediately, then again after every
    /// change that touches a matching document.
    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<ChangeStream, StoreError>;

    /// Atomically increments and returns a named counter, starting at 1.
    async fn next_sequence(&self, counter: &str) -> Result<u64, StoreError>;

    /// Applies every write or none. Returns the new versions in write order.
    async fn commit(&self, writes: Vec<Write>) -> Result<Vec<u64>, StoreError>;
}

/// Bounds a store call so it can never hang.
pub async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| StoreError::Timeout(limit))?
}

pub(crate) fn merge_patch(target: &mut Document, patch: Document) -> Result<(), StoreError> {
    let (Some(target), Value::Object(fields)) = (target.as_object_mut(), patch) else {
        return Err(StoreError::Serde("update requires object documents".into()));
    };
    target.extend(fields);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_top_level_field() {
        let doc = json!({"ownerId": "u1", "status": "pending"});
        assert!(Filter::All.matches(&doc));
        assert!(Filter::field_eq("ownerId", "u1").matches(&doc));
        assert!(!Filter::field_eq("ownerId", "u2").matches(&doc));
        assert!(!Filter::field_eq("missing", "u1").matches(&doc));
    }

    #[test]
    fn test_merge_patch_overwrites_only_given_fields() {
        let mut doc = json!({"status": "pending", "items": [1, 2]});
        merge_patch(&mut doc, json!({"status": "shipped"})).unwrap();
        assert_eq!(doc, json!({"status": "shipped", "items": [1, 2]}));
        assert!(merge_patch(&mut doc, json!(3)).is_err());
    }

    #[tokio::test]
    async fn test_timed_reports_timeout() {
        let limit = Duration::from_millis(10);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        };
        assert_eq!(timed(limit, slow).await, Err(StoreError::Timeout(limit)));
    }
}
