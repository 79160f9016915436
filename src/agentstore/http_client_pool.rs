//! HTTP Client Pool for backend engines.
//!
//! Every HTTP-based engine (CouchDB, Firestore) shares one `reqwest::Client` per base URL
//! and request timeout, so the data store keeps persistent connections open instead of
//! paying DNS/TLS setup on every document operation.

use crate::agentstore::error::StoreError;
use dashmap::DashMap;
use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Global cache of HTTP clients indexed by (base URL, timeout in milliseconds).
    static ref CLIENT_POOL: DashMap<(String, u64), reqwest::Client> = DashMap::new();
}

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client is configured with:
/// - up to 32 idle connections per host
/// - 90-second idle timeout for persistent connections
/// - TCP keepalive every 60 seconds
/// - `timeout` as both the connect and whole-request deadline
pub fn get_or_create_client(base_url: &str, timeout: Duration) -> Result<reqwest::Client, StoreError> {
    let key = (base_url.trim_end_matches('/').to_string(), timeout.as_millis() as u64);
    if let Some(client) = CLIENT_POOL.get(&key) {
        return Ok(client.clone());
    }

    let client = create_pooled_client(timeout)?;
    Ok(CLIENT_POOL.entry(key).or_insert(client).clone())
}

fn create_pooled_client(timeout: Duration) -> Result<reqwest::Client, StoreError> {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {}", e)))
}
