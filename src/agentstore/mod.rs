// src/agentstore/mod.rs

pub mod backends;
pub mod config;
pub mod data_store;
pub mod document_store;
pub mod ensured;
pub mod error;
pub mod http_client_pool;
pub mod proxy;
pub mod tool_protocol;
pub mod tool_protocols;

// Service and proxy are the two handles callers hold.
pub use data_store::DataStoreService;
pub use proxy::AgentDataStoreProxy;
