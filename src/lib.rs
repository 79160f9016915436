//! # agentstore
//!
//! A namespace-isolated, multi-tenant key-value store for AI agents, layered on a
//! pluggable document database.
//!
//! The crate provides layered abstractions for:
//!
//! * **Document engines**: the [`document_store::DocumentStore`] trait with CouchDB,
//!   Firestore and in-process implementations in [`backends`]
//! * **The data store service**: [`DataStoreService`] derives collision-free composite ids,
//!   keeps the `[userId, namespace]` index provisioned, answers namespace dumps with a single
//!   indexed query, and records which agent read what
//! * **Agent handles**: [`AgentDataStoreProxy`], the user/agent/namespace-scoped view handed
//!   to agent code
//! * **Tools**: [`tool_protocols::DataStoreProtocol`] exposes a proxy to agent runtimes as
//!   the `data_store` tool
//!
//! ## Quick start
//!
//! ```rust
//! use agentstore::{AgentDataStoreProxy, DataStoreConfig, DataStoreService};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), agentstore::StoreError> {
//!     agentstore::init_logger();
//!
//!     // Memory backend by default; set DATASTORE_BACKEND=couchdb|firestore for real engines.
//!     let service = Arc::new(DataStoreService::open(&DataStoreConfig::default()).await?);
//!
//!     let files = AgentDataStoreProxy::new(service, "user-42", "indexer")
//!         .use_namespace("files:repoA");
//!     files.set("a.py", json!("print(1)"), None).await?;
//!     files.set("b.py", json!("print(2)"), None).await?;
//!
//!     let all = files.get_all().await?;
//!     assert_eq!(all.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! ## Choosing an engine
//!
//! ```rust,no_run
//! use agentstore::{DataStoreConfig, DataStoreService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // DATASTORE_BACKEND=couchdb COUCHDB_URL=http://localhost:5984 ...
//!     let config = DataStoreConfig::from_env()?;
//!     let service = DataStoreService::open(&config).await?;
//!     println!("serving from {}", service.engine_name());
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// ```rust
/// agentstore::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agentstore` module.
pub mod agentstore;

// Re-exporting key items for easier external access.
pub use agentstore::backends;
pub use agentstore::config;
pub use agentstore::config::{BackendConfig, DataStoreConfig};
pub use agentstore::data_store;
pub use agentstore::data_store::{BatchItem, DataStoreService, Record};
pub use agentstore::document_store;
pub use agentstore::error;
pub use agentstore::error::StoreError;
pub use agentstore::proxy;
pub use agentstore::proxy::AgentDataStoreProxy;
pub use agentstore::tool_protocol;
pub use agentstore::tool_protocols;
