//! Document Store Abstraction Layer
//!
//! A minimal document-database contract over a logical database (CouchDB database,
//! Firestore collection, in-process map) keyed by document id. The data store service
//! depends only on this trait, so engines with very different consistency and indexing
//! models can be swapped at startup.
//!
//! # Architecture
//!
//! ```text
//! DataStoreService → DocumentStore (trait) → [CouchDbStore | FirestoreStore | MemoryStore]
//! ```
//!
//! `find` has a generic default built on `list_all` plus client-side filtering
//! ([`filter_documents`]). It is always correct but O(N); engines that can push the
//! selector down override it and fall back to [`filter_documents`] when the native
//! query fails.

use crate::agentstore::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored document: a JSON object whose `_id` field carries the document id.
pub type Document = Map<String, Value>;

/// Equality filter: every `field → value` pair must match exactly.
pub type Selector = Map<String, Value>;

/// Field name holding the document id on every returned document.
pub const ID_FIELD: &str = "_id";

/// Field name holding the engine's write token, when the engine exposes one.
pub const REV_FIELD: &str = "_rev";

/// Upper bound on documents returned by a single `find`.
pub const DEFAULT_FIND_LIMIT: usize = 10_000;

/// Acknowledgment returned by [`DocumentStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub id: String,
    /// Engine-specific revision or version token of the written document.
    pub rev: String,
}

/// An index to provision: ordered field list plus a stable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit name, or `idx-<field>_<field>` when none was given.
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("idx-{}", self.fields.join("_")),
        }
    }

    /// Order-insensitive identity used by "already ensured" caches.
    pub fn sorted_fields(&self) -> Vec<String> {
        let mut fields = self.fields.clone();
        fields.sort();
        fields
    }
}

/// Trait implemented by every document-database engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id; `StoreError::NotFound` if absent.
    async fn get(&self, db: &str, id: &str) -> Result<Document, StoreError>;

    /// Create or overwrite a document. The `_id` field is set to `id` before persisting.
    async fn save(&self, db: &str, id: &str, doc: Document) -> Result<WriteAck, StoreError>;

    /// Remove a document; `StoreError::NotFound` if absent.
    async fn delete(&self, db: &str, id: &str) -> Result<(), StoreError>;

    /// Unindexed scan of every document in the database.
    async fn list_all(&self, db: &str) -> Result<Vec<Document>, StoreError>;

    /// Documents whose fields equal every pair in `selector`, optionally projected
    /// down to `fields` (plus `_id`), at most `limit` of them.
    async fn find(
        &self,
        db: &str,
        selector: &Selector,
        fields: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        validate_selector(selector)?;
        let all_docs = self.list_all(db).await?;
        Ok(filter_documents(all_docs, selector, fields, limit))
    }

    /// Make sure an index exists. Must be idempotent and cheap to repeat.
    async fn ensure_index(&self, _db: &str, _index: &IndexSpec) -> Result<(), StoreError> {
        Ok(())
    }

    /// Engine identifier used in log lines (e.g. "couchdb", "firestore").
    fn engine_name(&self) -> &str;
}

/// Reject selectors no engine can express.
pub fn validate_selector(selector: &Selector) -> Result<(), StoreError> {
    if selector.keys().any(|field| field.trim().is_empty()) {
        return Err(StoreError::InvalidSelector(
            "selector contains an empty field name".to_string(),
        ));
    }
    Ok(())
}

/// Does `doc` match every `field → value` pair of the selector?
///
/// A field missing from the document only matches a `null` selector value.
pub fn matches_selector(doc: &Document, selector: &Selector) -> bool {
    selector
        .iter()
        .all(|(field, expected)| doc.get(field).unwrap_or(&Value::Null) == expected)
}

/// Keep only `fields` (plus `_id` when present). Missing fields come back as `null`.
pub fn project(doc: &Document, fields: &[&str]) -> Document {
    let mut projected = Map::new();
    if let Some(id) = doc.get(ID_FIELD) {
        projected.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        let value = doc.get(*field).cloned().unwrap_or(Value::Null);
        projected.insert((*field).to_string(), value);
    }
    projected
}

/// Client-side evaluation of a `find`: the generic fallback path for every engine.
pub fn filter_documents(
    docs: Vec<Document>,
    selector: &Selector,
    fields: Option<&[&str]>,
    limit: usize,
) -> Vec<Document> {
    let mut results = Vec::new();
    for doc in docs {
        if results.len() >= limit {
            break;
        }
        if !matches_selector(&doc, selector) {
            continue;
        }
        match fields {
            Some(fields) if !fields.is_empty() => results.push(project(&doc, fields)),
            _ => results.push(doc),
        }
    }
    results
}

/// Build a selector from `(field, value)` pairs.
pub fn selector<I, K, V>(pairs: I) -> Selector
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
