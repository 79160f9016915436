//! Configuration for the agent data store.
//!
//! [`DataStoreConfig`] picks the document-store engine and its connection settings.
//! Construct it by hand, or read it from the process environment with
//! [`DataStoreConfig::from_env`].
//!
//! # Example
//!
//! ```rust
//! use agentstore::config::{BackendConfig, DataStoreConfig};
//! use std::time::Duration;
//!
//! // Default: in-process engine, 30 second request timeout.
//! let config = DataStoreConfig::default();
//! assert_eq!(config.backend, BackendConfig::Memory);
//!
//! let config = DataStoreConfig {
//!     backend: BackendConfig::CouchDb {
//!         url: "http://localhost:5984".to_string(),
//!         user: "admin".to_string(),
//!         password: "secret".to_string(),
//!     },
//!     request_timeout: Duration::from_secs(10),
//! };
//! ```
//!
//! # Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `DATASTORE_BACKEND` | `couchdb`, `firestore` or `memory` (default) |
//! | `DATASTORE_TIMEOUT_SECS` | per-request timeout, default 30 |
//! | `COUCHDB_URL`, `COUCHDB_USER`, `COUCHDB_PASSWORD` | CouchDB server and credentials |
//! | `FIRESTORE_PROJECT_ID` | Google Cloud project (required for Firestore) |
//! | `FIRESTORE_DATABASE_ID` | database id, default `(default)` |
//! | `FIRESTORE_EMULATOR_HOST` | `host:port` of a local emulator |
//! | `FIRESTORE_ACCESS_TOKEN` | OAuth bearer token |

use crate::agentstore::backends::firestore::{DEFAULT_DATABASE, DEFAULT_ENDPOINT};
use crate::agentstore::backends::{CouchDbStore, FirestoreStore, MemoryStore};
use crate::agentstore::document_store::DocumentStore;
use crate::agentstore::error::StoreError;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which engine to run and how to reach it.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    CouchDb {
        url: String,
        user: String,
        password: String,
    },
    Firestore {
        project_id: String,
        database_id: String,
        /// Base URL, e.g. `https://firestore.googleapis.com` or `http://localhost:8080`.
        endpoint: String,
        access_token: Option<String>,
    },
    Memory,
}

/// Data store settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStoreConfig {
    pub backend: BackendConfig,
    /// Applied to connecting and to every backend request.
    pub request_timeout: Duration,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl DataStoreConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which returns a variable's value if set.
    ///
    /// ```rust
    /// use agentstore::config::{BackendConfig, DataStoreConfig};
    ///
    /// let config = DataStoreConfig::from_lookup(|name| match name {
    ///     "DATASTORE_BACKEND" => Some("couchdb".to_string()),
    ///     "COUCHDB_URL" => Some("http://db:5984".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert!(matches!(config.backend, BackendConfig::CouchDb { .. }));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let request_timeout = match var("DATASTORE_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                StoreError::Config(format!("DATASTORE_TIMEOUT_SECS is not a number: {}", raw))
            })?),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let provider = var("DATASTORE_BACKEND").unwrap_or_else(|| "memory".to_string());
        let backend = match provider.trim().to_lowercase().as_str() {
            "couchdb" => BackendConfig::CouchDb {
                url: var("COUCHDB_URL").ok_or_else(|| {
                    StoreError::Config("COUCHDB_URL is required for the couchdb backend".into())
                })?,
                user: var("COUCHDB_USER").unwrap_or_default(),
                password: var("COUCHDB_PASSWORD").unwrap_or_default(),
            },
            "firestore" => BackendConfig::Firestore {
                project_id: var("FIRESTORE_PROJECT_ID").ok_or_else(|| {
                    StoreError::Config(
                        "FIRESTORE_PROJECT_ID is required for the firestore backend".into(),
                    )
                })?,
                database_id: var("FIRESTORE_DATABASE_ID")
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                endpoint: var("FIRESTORE_EMULATOR_HOST")
                    .map(|host| format!("http://{}", host))
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                access_token: var("FIRESTORE_ACCESS_TOKEN"),
            },
            "memory" => BackendConfig::Memory,
            other => {
                return Err(StoreError::Config(format!(
                    "unknown DATASTORE_BACKEND '{}' (expected couchdb, firestore or memory)",
                    other
                )))
            }
        };

        Ok(Self {
            backend,
            request_timeout,
        })
    }

    /// Build and connect the configured engine.
    pub async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        let store: Arc<dyn DocumentStore> = match &self.backend {
            BackendConfig::CouchDb {
                url,
                user,
                password,
            } => Arc::new(CouchDbStore::connect(url, user, password, self.request_timeout).await?),
            BackendConfig::Firestore {
                project_id,
                database_id,
                endpoint,
                access_token,
            } => Arc::new(
                FirestoreStore::connect(
                    endpoint,
                    project_id,
                    database_id,
                    access_token.clone(),
                    self.request_timeout,
                )
                .await?,
            ),
            BackendConfig::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
