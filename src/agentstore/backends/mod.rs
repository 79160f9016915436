//! Document Store Engines
//!
//! - **CouchDbStore**: revision-based engine with lazy database creation, optimistic
//!   concurrency, Mango queries and explicit, cached index creation
//! - **FirestoreStore**: managed engine with last-write-wins saves, native equality
//!   filters and automatic indexing
//! - **MemoryStore**: in-process engine for local development and tests

pub mod couchdb;
pub mod firestore;
pub mod firestore_value;
pub mod memory;

pub use couchdb::CouchDbStore;
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
