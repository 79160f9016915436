//! Agent Data Store
//!
//! A namespace-isolated, multi-tenant key-value store layered on any
//! [`DocumentStore`]. Agents owned by the same user share one data pool; each key lives
//! in a namespace, and the `(user id, namespace, key)` triple maps to exactly one
//! document through [`make_doc_id`].
//!
//! # Features
//!
//! - **Composite ids**: `user:namespace:base64url(key)`, so colons or slashes in a key
//!   can never collide with the surrounding structure
//! - **Indexed queries**: namespace listings and dumps go through a single `find` on the
//!   `[userId, namespace]` index instead of a per-key scan
//! - **Index provisioning**: standard indexes are ensured at startup and re-ensured once
//!   per `(user, namespace)` seen on the write path
//! - **Access telemetry**: an agent-tagged read bumps `accessCount` and records the
//!   reader. This is best-effort: a failed tracking write never fails the read
//!
//! Concurrent agent-tagged reads of the same key race on `accessCount`; both may write
//! `N + 1`. Counts are approximate under contention.
//!
//! # Example
//!
//! ```rust
//! use agentstore::backends::MemoryStore;
//! use agentstore::data_store::DataStoreService;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), agentstore::StoreError> {
//! let service = DataStoreService::new(Arc::new(MemoryStore::new()));
//!
//! service
//!     .set("u1", "files:repoA", "a.py", json!("print(1)"), Some("indexer"), None)
//!     .await?;
//! let all = service.get_all("u1", "files:repoA", None).await?;
//! assert_eq!(all["a.py"], json!("print(1)"));
//! # Ok(())
//! # }
//! ```

use crate::agentstore::config::DataStoreConfig;
use crate::agentstore::document_store::{
    selector, Document, DocumentStore, IndexSpec, DEFAULT_FIND_LIMIT, ID_FIELD, REV_FIELD,
};
use crate::agentstore::ensured::EnsuredSet;
use crate::agentstore::error::StoreError;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::sync::Arc;

/// Database / collection holding every data store record.
pub const DATA_STORE_DB: &str = "agent_data_store";

/// Namespace used when none is given, and for records stored without one.
pub const DEFAULT_NAMESPACE: &str = "default";

pub const FIELD_USER_ID: &str = "userId";
pub const FIELD_NAMESPACE: &str = "namespace";
pub const FIELD_KEY: &str = "key";
pub const FIELD_VALUE: &str = "value";
const FIELD_LAST_ACCESSED_BY: &str = "lastAccessedByAgent";
const FIELD_LAST_ACCESSED_AT: &str = "lastAccessedAt";
const FIELD_ACCESS_COUNT: &str = "accessCount";

/// Upper bound on concurrent access-tracking writes issued by `get_all`.
const ACCESS_TRACKING_CONCURRENCY: usize = 8;

/// Indexes every data store database must carry.
pub fn standard_indexes() -> Vec<IndexSpec> {
    vec![IndexSpec::new([FIELD_USER_ID, FIELD_NAMESPACE]).with_name("idx-user-namespace")]
}

/// Derive the document id for `(user_id, namespace, key)`.
///
/// Only the key is encoded (URL-safe base64, padded); user and namespace stay readable.
///
/// ```rust
/// use agentstore::data_store::make_doc_id;
///
/// assert_eq!(make_doc_id("u1", "ns", "a.py"), "u1:ns:YS5weQ==");
/// assert_ne!(make_doc_id("u1", "ns", "a:b"), make_doc_id("u1", "ns:a", "b"));
/// ```
pub fn make_doc_id(user_id: &str, namespace: &str, key: &str) -> String {
    let safe_key = base64::engine::general_purpose::URL_SAFE.encode(key.as_bytes());
    format!("{}:{}:{}", user_id, namespace, safe_key)
}

/// Serialize timestamps as RFC 3339; accept naive ISO-8601 strings from older writers.
mod timestamp {
    use super::parse_timestamp;
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn namespace_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(default_namespace))
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// One stored item, in its persisted wire shape.
///
/// Fields the data store does not know about are kept in `extra` and written back
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "_id", default)]
    pub id: String,
    /// Write token from the last save, when the engine exposes one.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_namespace", deserialize_with = "namespace_or_default")]
    pub namespace: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_by_agent: Option<String>,
    #[serde(default)]
    pub last_accessed_by_agent: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_count: u64,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// A brand-new record with a zeroed access counter.
    pub fn new(
        user_id: &str,
        namespace: &str,
        key: &str,
        value: Value,
        metadata: Map<String, Value>,
        agent_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: make_doc_id(user_id, namespace, key),
            rev: None,
            user_id: user_id.to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            metadata,
            created_by_agent: agent_name.map(str::to_string),
            last_accessed_by_agent: agent_name.map(str::to_string),
            access_count: 0,
            created_at: Some(now),
            updated_at: Some(now),
            last_accessed_at: agent_name.map(|_| now),
            extra: Map::new(),
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    pub fn to_document(&self) -> Result<Document, StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            other => Err(StoreError::Serialization(format!(
                "record serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Size in bytes of the JSON-encoded value.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(&self.value).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

/// One entry of a [`DataStoreService::set_many`] batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub namespace: String,
    pub key: String,
    pub value: Value,
    pub metadata: Option<Map<String, Value>>,
}

impl BatchItem {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Record an agent read on a raw document: reader, time, and `accessCount + 1`.
fn touch_access(doc: &mut Document, agent_name: &str, now: DateTime<Utc>) {
    let count = doc
        .get(FIELD_ACCESS_COUNT)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    doc.insert(
        FIELD_LAST_ACCESSED_BY.to_string(),
        Value::String(agent_name.to_string()),
    );
    doc.insert(
        FIELD_LAST_ACCESSED_AT.to_string(),
        Value::String(format_timestamp(now)),
    );
    doc.insert(FIELD_ACCESS_COUNT.to_string(), Value::from(count + 1));
}

/// Domain layer of the agent data store. Construct once per process and share.
pub struct DataStoreService {
    store: Arc<dyn DocumentStore>,
    indexed_namespaces: EnsuredSet<(String, String)>,
}

impl DataStoreService {
    /// Wrap an already-connected engine. Performs no I/O; use
    /// [`with_standard_indexes`](Self::with_standard_indexes) to provision eagerly.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            indexed_namespaces: EnsuredSet::new(),
        }
    }

    /// Wrap an already-connected engine and provision the standard indexes up front.
    pub async fn with_standard_indexes(store: Arc<dyn DocumentStore>) -> Self {
        let service = Self::new(store);
        service.ensure_standard_indexes().await;
        log::info!(
            "Agent data store ready on the {} engine",
            service.engine_name()
        );
        service
    }

    /// Connect the configured engine and provision the standard indexes.
    ///
    /// An unreachable backend fails here, before any request is served.
    pub async fn open(config: &DataStoreConfig) -> Result<Self, StoreError> {
        Ok(Self::with_standard_indexes(config.connect().await?).await)
    }

    pub fn engine_name(&self) -> &str {
        self.store.engine_name()
    }

    /// Create the standard indexes. Failures are logged; queries stay correct, only slower.
    pub async fn ensure_standard_indexes(&self) {
        for index in standard_indexes() {
            if let Err(e) = self.store.ensure_index(DATA_STORE_DB, &index).await {
                log::warn!(
                    "could not ensure index {} on {}: {}",
                    index.resolved_name(),
                    DATA_STORE_DB,
                    e
                );
            }
        }
    }

    /// Re-ensure the standard indexes the first time a `(user, namespace)` is written
    /// in this process, covering databases recreated since startup.
    async fn ensure_namespace_indexed(&self, user_id: &str, namespace: &str) {
        let cache_key = (user_id.to_string(), namespace.to_string());
        // Index failures are logged inside and never block writes.
        let outcome: Result<(), Infallible> = self
            .indexed_namespaces
            .ensure(cache_key, || async {
                self.ensure_standard_indexes().await;
                Ok(())
            })
            .await;
        outcome.unwrap_or_default()
    }

    /// Look up a record. `None` if the key does not exist.
    ///
    /// With `agent_name`, the read is also recorded on the document (best-effort).
    pub async fn get(
        &self,
        user_id: &str,
        namespace: &str,
        key: &str,
        agent_name: Option<&str>,
    ) -> Result<Option<Record>, StoreError> {
        let doc_id = make_doc_id(user_id, namespace, key);
        let mut doc = match self.store.get(DATA_STORE_DB, &doc_id).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Some(agent) = agent_name {
            touch_access(&mut doc, agent, Utc::now());
            match self.store.save(DATA_STORE_DB, &doc_id, doc.clone()).await {
                Ok(ack) => {
                    doc.insert(REV_FIELD.to_string(), Value::String(ack.rev));
                }
                Err(e) => log::warn!("access tracking failed for {}: {}", doc_id, e),
            }
        }

        Record::from_document(doc).map(Some)
    }

    /// Create or update a record.
    ///
    /// Updates overwrite `value`/`updatedAt`, shallow-merge `metadata` and keep the
    /// creation fields and `accessCount`. The returned record carries the engine's
    /// write token in `rev`.
    pub async fn set(
        &self,
        user_id: &str,
        namespace: &str,
        key: &str,
        value: Value,
        agent_name: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Record, StoreError> {
        let doc_id = make_doc_id(user_id, namespace, key);
        let now = Utc::now();

        self.ensure_namespace_indexed(user_id, namespace).await;

        let existing = match self.store.get(DATA_STORE_DB, &doc_id).await {
            Ok(doc) => Some(Record::from_document(doc)?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut record = match existing {
            Some(mut record) => {
                record.id = doc_id.clone();
                record.value = value;
                record.updated_at = Some(now);
                if let Some(metadata) = metadata {
                    record.metadata.extend(metadata);
                }
                if let Some(agent) = agent_name {
                    record.last_accessed_by_agent = Some(agent.to_string());
                    record.last_accessed_at = Some(now);
                }
                record
            }
            None => Record::new(
                user_id,
                namespace,
                key,
                value,
                metadata.unwrap_or_default(),
                agent_name,
                now,
            ),
        };

        let ack = self
            .store
            .save(DATA_STORE_DB, &doc_id, record.to_document()?)
            .await?;
        record.rev = Some(ack.rev);
        log::debug!(
            "stored {} ({} bytes) for {}/{}",
            key,
            record.estimated_size(),
            user_id,
            namespace
        );
        Ok(record)
    }

    /// Remove a record. Returns whether anything was deleted.
    pub async fn delete(&self, user_id: &str, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let doc_id = make_doc_id(user_id, namespace, key);
        match self.store.delete(DATA_STORE_DB, &doc_id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Sorted keys of a namespace, optionally restricted to those starting with `prefix`.
    pub async fn list_keys(
        &self,
        user_id: &str,
        namespace: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let docs = self
            .store
            .find(
                DATA_STORE_DB,
                &selector([(FIELD_USER_ID, user_id), (FIELD_NAMESPACE, namespace)]),
                Some(&[FIELD_KEY][..]),
                DEFAULT_FIND_LIMIT,
            )
            .await?;

        let mut keys: Vec<String> = docs
            .iter()
            .map(|doc| doc.get(FIELD_KEY).and_then(Value::as_str).unwrap_or("").to_string())
            .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Sorted, distinct namespaces holding data for `user_id`.
    ///
    /// Records stored without a namespace are reported under `"default"`.
    pub async fn list_namespaces(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let docs = self
            .store
            .find(
                DATA_STORE_DB,
                &selector([(FIELD_USER_ID, user_id)]),
                Some(&[FIELD_NAMESPACE][..]),
                DEFAULT_FIND_LIMIT,
            )
            .await?;

        let namespaces: BTreeSet<String> = docs
            .iter()
            .map(|doc| {
                doc.get(FIELD_NAMESPACE)
                    .and_then(Value::as_str)
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or(DEFAULT_NAMESPACE)
                    .to_string()
            })
            .collect();
        Ok(namespaces.into_iter().collect())
    }

    /// Every `key → value` of a namespace from a single indexed query.
    ///
    /// With `agent_name`, each returned record also gets its access metadata bumped;
    /// those writes run concurrently after the query and their failures are only logged.
    pub async fn get_all(
        &self,
        user_id: &str,
        namespace: &str,
        agent_name: Option<&str>,
    ) -> Result<BTreeMap<String, Value>, StoreError> {
        let docs = self
            .store
            .find(
                DATA_STORE_DB,
                &selector([(FIELD_USER_ID, user_id), (FIELD_NAMESPACE, namespace)]),
                None,
                DEFAULT_FIND_LIMIT,
            )
            .await?;

        let now = Utc::now();
        let mut results = BTreeMap::new();
        let mut touched = Vec::new();
        for mut doc in docs {
            let key = doc
                .get(FIELD_KEY)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            results.insert(key.clone(), doc.get(FIELD_VALUE).cloned().unwrap_or(Value::Null));

            if let Some(agent) = agent_name {
                touch_access(&mut doc, agent, now);
                let doc_id = doc
                    .get(ID_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| make_doc_id(user_id, namespace, &key));
                touched.push((doc_id, doc));
            }
        }

        if !touched.is_empty() {
            self.record_bulk_access(touched).await;
        }
        Ok(results)
    }

    async fn record_bulk_access(&self, touched: Vec<(String, Document)>) {
        let store = &self.store;
        let failures: Vec<(String, StoreError)> = stream::iter(touched)
            .map(|(doc_id, doc)| async move {
                match store.save(DATA_STORE_DB, &doc_id, doc).await {
                    Ok(_) => None,
                    Err(e) => Some((doc_id, e)),
                }
            })
            .buffer_unordered(ACCESS_TRACKING_CONCURRENCY)
            .filter_map(|failure| async move { failure })
            .collect()
            .await;

        for (doc_id, e) in failures {
            log::warn!("access tracking failed for {}: {}", doc_id, e);
        }
    }

    /// Values for each existing key among `keys` (one `get` per key).
    pub async fn get_many<I, S>(
        &self,
        user_id: &str,
        namespace: &str,
        keys: I,
        agent_name: Option<&str>,
    ) -> Result<BTreeMap<String, Value>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut results = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(record) = self.get(user_id, namespace, key, agent_name).await? {
                results.insert(key.to_string(), record.value);
            }
        }
        Ok(results)
    }

    /// Write every item in order and return how many were written.
    ///
    /// Not atomic: the first failing item aborts the batch with its error and the items
    /// before it stay written.
    pub async fn set_many<I>(
        &self,
        user_id: &str,
        items: I,
        agent_name: Option<&str>,
    ) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = BatchItem>,
    {
        let mut count = 0;
        for item in items {
            self.set(
                user_id,
                &item.namespace,
                &item.key,
                item.value,
                agent_name,
                item.metadata,
            )
            .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete every record of a namespace; returns how many were deleted.
    pub async fn clear_namespace(&self, user_id: &str, namespace: &str) -> Result<usize, StoreError> {
        let keys = self.list_keys(user_id, namespace, None).await?;
        let mut count = 0;
        for key in keys {
            if self.delete(user_id, namespace, &key).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}
