//! In-process document store.
//!
//! [`MemoryStore`] keeps every database in a mutex-guarded map and implements the
//! [`DocumentStore`] contract with the generic `find`. It backs the `memory` backend
//! for local development and is the engine the data store tests run against.
//!
//! # Examples
//!
//! ```rust
//! use agentstore::backends::MemoryStore;
//! use agentstore::document_store::DocumentStore;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), agentstore::StoreError> {
//! let store = MemoryStore::new();
//! let doc = json!({"userId": "u1", "key": "a"}).as_object().cloned().unwrap();
//! let ack = store.save("agent_data_store", "doc-1", doc).await?;
//! assert_eq!(ack.rev, "1-mem");
//!
//! let loaded = store.get("agent_data_store", "doc-1").await?;
//! assert_eq!(loaded["_id"], "doc-1");
//! # Ok(())
//! # }
//! ```

use crate::agentstore::document_store::{
    Document, DocumentStore, IndexSpec, WriteAck, ID_FIELD, REV_FIELD,
};
use crate::agentstore::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct StoredDocument {
    doc: Document,
    revision: u64,
    written_utc: DateTime<Utc>,
}

/// Database name → (document id → stored document). Ids iterate in sorted order.
type Databases = HashMap<String, BTreeMap<String, StoredDocument>>;

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    databases: Arc<Mutex<Databases>>,
    indexes: Arc<Mutex<HashMap<String, Vec<IndexSpec>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in `db`.
    pub fn len(&self, db: &str) -> usize {
        lock(&self.databases).get(db).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, db: &str) -> bool {
        self.len(db) == 0
    }

    /// Indexes recorded through `ensure_index`, in creation order.
    pub fn indexes(&self, db: &str) -> Vec<IndexSpec> {
        lock(&self.indexes).get(db).cloned().unwrap_or_default()
    }

    /// When the document was last written, if it exists.
    pub fn written_at(&self, db: &str, id: &str) -> Option<DateTime<Utc>> {
        lock(&self.databases)
            .get(db)
            .and_then(|docs| docs.get(id))
            .map(|stored| stored.written_utc)
    }

    /// Insert a raw document exactly as given, bypassing `save` normalisation.
    /// Useful for seeding records written by other tools.
    pub fn insert_raw(&self, db: &str, id: &str, doc: Document) {
        let mut databases = lock(&self.databases);
        databases.entry(db.to_string()).or_default().insert(
            id.to_string(),
            StoredDocument {
                doc,
                revision: 1,
                written_utc: Utc::now(),
            },
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn revision_token(revision: u64) -> String {
    format!("{}-mem", revision)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, db: &str, id: &str) -> Result<Document, StoreError> {
        lock(&self.databases)
            .get(db)
            .and_then(|docs| docs.get(id))
            .map(|stored| stored.doc.clone())
            .ok_or_else(|| StoreError::not_found(db, id))
    }

    async fn save(&self, db: &str, id: &str, mut doc: Document) -> Result<WriteAck, StoreError> {
        let mut databases = lock(&self.databases);
        let docs = databases.entry(db.to_string()).or_default();
        let revision = docs.get(id).map_or(1, |stored| stored.revision + 1);
        let rev = revision_token(revision);

        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        doc.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
        docs.insert(
            id.to_string(),
            StoredDocument {
                doc,
                revision,
                written_utc: Utc::now(),
            },
        );

        Ok(WriteAck {
            id: id.to_string(),
            rev,
        })
    }

    async fn delete(&self, db: &str, id: &str) -> Result<(), StoreError> {
        let mut databases = lock(&self.databases);
        databases
            .get_mut(db)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(db, id))
    }

    async fn list_all(&self, db: &str) -> Result<Vec<Document>, StoreError> {
        Ok(lock(&self.databases)
            .get(db)
            .map(|docs| docs.values().map(|stored| stored.doc.clone()).collect())
            .unwrap_or_default())
    }

    async fn ensure_index(&self, db: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut indexes = lock(&self.indexes);
        let known = indexes.entry(db.to_string()).or_default();
        if !known
            .iter()
            .any(|existing| existing.sorted_fields() == index.sorted_fields())
        {
            log::debug!(
                "memory store: created index {} on {}",
                index.resolved_name(),
                db
            );
            known.push(index.clone());
        }
        Ok(())
    }

    fn engine_name(&self) -> &str {
        "memory"
    }
}
