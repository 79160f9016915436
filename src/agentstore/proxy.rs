//! Per-agent view of the data store.
//!
//! An [`AgentDataStoreProxy`] binds a shared [`DataStoreService`] to one user id, one
//! agent name and a current namespace. It is the only handle given to agent code, so it
//! never exposes the service or any other user's data.
//!
//! # Example
//!
//! ```rust
//! use agentstore::backends::MemoryStore;
//! use agentstore::data_store::DataStoreService;
//! use agentstore::proxy::AgentDataStoreProxy;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), agentstore::StoreError> {
//! let service = Arc::new(DataStoreService::new(Arc::new(MemoryStore::new())));
//! let store = AgentDataStoreProxy::new(service, "u1", "indexer");
//!
//! store.set("greeting", json!("hello"), None).await?;
//! assert_eq!(store.get("greeting").await?, Some(json!("hello")));
//!
//! let files = store.use_namespace("files:repoA");
//! files.set("a.py", json!("print(1)"), None).await?;
//! assert_eq!(store.list_namespaces().await?, vec!["default", "files:repoA"]);
//! # Ok(())
//! # }
//! ```

use crate::agentstore::data_store::{BatchItem, DataStoreService, DEFAULT_NAMESPACE};
use crate::agentstore::error::StoreError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Namespace-scoped data store handle for a single agent.
#[derive(Clone)]
pub struct AgentDataStoreProxy {
    service: Arc<DataStoreService>,
    user_id: String,
    agent_name: String,
    namespace: String,
}

impl AgentDataStoreProxy {
    /// A proxy on the `"default"` namespace.
    pub fn new(
        service: Arc<DataStoreService>,
        user_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self::with_namespace(service, user_id, agent_name, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(
        service: Arc<DataStoreService>,
        user_id: impl Into<String>,
        agent_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            service,
            user_id: user_id.into(),
            agent_name: agent_name.into(),
            namespace: namespace.into(),
        }
    }

    /// A new proxy for the same user and agent on another namespace. `self` is unchanged.
    pub fn use_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            service: Arc::clone(&self.service),
            user_id: self.user_id.clone(),
            agent_name: self.agent_name.clone(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Value stored under `key`, if any. Counts as an access by this agent.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .service
            .get(&self.user_id, &self.namespace, key, Some(&self.agent_name))
            .await?
            .map(|record| record.value))
    }

    /// Like [`get`](Self::get), with `default` for a missing key.
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, StoreError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn set(
        &self,
        key: &str,
        value: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), StoreError> {
        self.service
            .set(
                &self.user_id,
                &self.namespace,
                key,
                value,
                Some(&self.agent_name),
                metadata,
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.service
            .delete(&self.user_id, &self.namespace, key)
            .await
    }

    pub async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        self.service
            .list_keys(&self.user_id, &self.namespace, prefix)
            .await
    }

    /// Every namespace this user has data in, not only the agent's own.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        self.service.list_namespaces(&self.user_id).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        self.service
            .get_all(&self.user_id, &self.namespace, Some(&self.agent_name))
            .await
    }

    pub async fn get_many<I, S>(&self, keys: I) -> Result<BTreeMap<String, Value>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.service
            .get_many(&self.user_id, &self.namespace, keys, Some(&self.agent_name))
            .await
    }

    /// Write every `(key, value)` pair into the current namespace, each with the same
    /// `metadata`. Returns the number written.
    pub async fn set_many<I, K>(
        &self,
        items: I,
        metadata: Option<Map<String, Value>>,
    ) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let batch = items.into_iter().map(|(key, value)| BatchItem {
            namespace: self.namespace.clone(),
            key: key.into(),
            value,
            metadata: metadata.clone(),
        });
        self.service
            .set_many(&self.user_id, batch, Some(&self.agent_name))
            .await
    }

    /// Delete everything in the current namespace.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.service
            .clear_namespace(&self.user_id, &self.namespace)
            .await
    }
}

impl std::fmt::Debug for AgentDataStoreProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDataStoreProxy")
            .field("user_id", &self.user_id)
            .field("agent_name", &self.agent_name)
            .field("namespace", &self.namespace)
            .finish()
    }
}
