//! CouchDB engine (revision-based).
//!
//! Talks to the CouchDB HTTP API directly through a pooled `reqwest` client:
//!
//! - databases are created lazily on first access (`PUT /{db}?n=1&q=2`)
//! - `save` looks up the current revision with a `HEAD` and attaches it, so an
//!   overwrite only conflicts when another writer lands in between (HTTP 409)
//! - `find` uses a Mango `_find` query and falls back to the generic scan when the
//!   endpoint errors (older deployments have no `_find`)
//! - `ensure_index` posts to `_index`, which the server treats as idempotent, and
//!   remembers `(db, sorted fields)` so later writes skip the round trip; concurrent
//!   first callers share a single request

use crate::agentstore::document_store::{
    filter_documents, validate_selector, Document, DocumentStore, IndexSpec, Selector, WriteAck,
    ID_FIELD, REV_FIELD,
};
use crate::agentstore::ensured::EnsuredSet;
use crate::agentstore::error::StoreError;
use crate::agentstore::http_client_pool::get_or_create_client;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    id: String,
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<Document>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    result: Option<String>,
}

/// [`DocumentStore`] backed by a CouchDB server.
pub struct CouchDbStore {
    base_url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
    known_databases: EnsuredSet<String>,
    ensured_indexes: EnsuredSet<(String, Vec<String>)>,
}

impl CouchDbStore {
    /// Connect to the server at `url` and verify it answers.
    ///
    /// Fails with [`StoreError::Transport`] when the server is unreachable, which
    /// callers treat as fatal at startup.
    pub async fn connect(
        url: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = url.trim_end_matches('/').to_string();
        let client = get_or_create_client(&base_url, timeout)?;
        let credentials = if user.is_empty() {
            None
        } else {
            Some((user.to_string(), password.to_string()))
        };

        let store = Self {
            base_url,
            credentials,
            client,
            known_databases: EnsuredSet::new(),
            ensured_indexes: EnsuredSet::new(),
        };

        let response = store
            .authed(store.client.get(format!("{}/", store.base_url)))
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to connect to CouchDB server at {}: {}", url, e);
                StoreError::Transport(format!("could not connect to CouchDB at {}: {}", url, e))
            })?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }
        let info: ServerInfo = response.json().await?;
        log::info!(
            "Connected to CouchDB server at {} (version {})",
            store.base_url,
            info.version.as_deref().unwrap_or("unknown")
        );
        Ok(store)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn db_url(&self, db: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(db))
    }

    fn doc_url(&self, db: &str, id: &str) -> String {
        format!("{}/{}", self.db_url(db), urlencoding::encode(id))
    }

    /// Create `db` the first time this process touches it.
    async fn ensure_database(&self, db: &str) -> Result<(), StoreError> {
        self.known_databases
            .ensure(db.to_string(), || self.create_database_if_missing(db))
            .await
    }

    async fn create_database_if_missing(&self, db: &str) -> Result<(), StoreError> {
        let head = self.authed(self.client.head(self.db_url(db))).send().await?;
        match head.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                log::info!("Database '{}' not found. Creating it.", db);
                let created = self
                    .authed(self.client.put(format!("{}?n=1&q=2", self.db_url(db))))
                    .send()
                    .await?;
                // 412: someone else created it between our HEAD and PUT.
                if !created.status().is_success()
                    && created.status() != StatusCode::PRECONDITION_FAILED
                {
                    return Err(StoreError::from_response(created).await);
                }
                Ok(())
            }
            _ => Err(StoreError::from_response(head).await),
        }
    }

    async fn create_index(&self, db: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.ensure_database(db).await?;
        let name = index.resolved_name();
        let response = self
            .authed(self.client.post(format!("{}/_index", self.db_url(db))))
            .json(&json!({
                "index": { "fields": index.fields },
                "name": name,
                "type": "json",
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }

        let outcome: IndexResponse = response.json().await?;
        log::debug!(
            "CouchDB index {} on {}: {}",
            name,
            db,
            outcome.result.as_deref().unwrap_or("ok")
        );
        Ok(())
    }

    /// Current revision of a document, `None` if it does not exist.
    async fn current_revision(&self, db: &str, id: &str) -> Result<Option<String>, StoreError> {
        let response = self.authed(self.client.head(self.doc_url(db, id))).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|etag| etag.to_str().ok())
                .map(|etag| etag.trim_matches('"').to_string())),
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn native_find(
        &self,
        db: &str,
        selector: &Selector,
        fields: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_database(db).await?;

        let mut query = json!({ "selector": selector, "limit": limit });
        if let Some(fields) = fields.filter(|f| !f.is_empty()) {
            let mut projected: Vec<&str> = vec![ID_FIELD];
            projected.extend(fields.iter().copied().filter(|f| *f != ID_FIELD));
            query["fields"] = json!(projected);
        }

        let response = self
            .authed(self.client.post(format!("{}/_find", self.db_url(db))))
            .json(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }

        let found: FindResponse = response.json().await?;
        if let Some(warning) = found.warning {
            log::debug!("CouchDB _find on {}: {}", db, warning);
        }
        Ok(found.docs)
    }
}

#[async_trait]
impl DocumentStore for CouchDbStore {
    async fn get(&self, db: &str, id: &str) -> Result<Document, StoreError> {
        self.ensure_database(db).await?;
        let response = self.authed(self.client.get(self.doc_url(db, id))).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(db, id)),
            status if status.is_success() => Ok(response.json().await?),
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn save(&self, db: &str, id: &str, mut doc: Document) -> Result<WriteAck, StoreError> {
        self.ensure_database(db).await?;
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        match self.current_revision(db, id).await? {
            Some(rev) => {
                doc.insert(REV_FIELD.to_string(), Value::String(rev));
            }
            None => {
                doc.remove(REV_FIELD);
            }
        }

        let response = self
            .authed(self.client.put(self.doc_url(db, id)))
            .json(&doc)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => {
                let detail = response.text().await.unwrap_or_default();
                Err(StoreError::conflict(db, id, detail))
            }
            StatusCode::NOT_FOUND => {
                // Database dropped since we created it; recreate on the next call.
                self.known_databases.forget(&db.to_string());
                Err(StoreError::from_response(response).await)
            }
            status if status.is_success() => {
                let written: PutResponse = response.json().await?;
                Ok(WriteAck {
                    id: written.id,
                    rev: written.rev,
                })
            }
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn delete(&self, db: &str, id: &str) -> Result<(), StoreError> {
        self.ensure_database(db).await?;
        let rev = self
            .current_revision(db, id)
            .await?
            .ok_or_else(|| StoreError::not_found(db, id))?;

        let response = self
            .authed(self.client.delete(self.doc_url(db, id)))
            .query(&[("rev", rev.as_str())])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(db, id)),
            StatusCode::CONFLICT => {
                let detail = response.text().await.unwrap_or_default();
                Err(StoreError::conflict(db, id, detail))
            }
            status if status.is_success() => Ok(()),
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn list_all(&self, db: &str) -> Result<Vec<Document>, StoreError> {
        self.ensure_database(db).await?;
        let response = self
            .authed(self.client.get(format!("{}/_all_docs", self.db_url(db))))
            .query(&[("include_docs", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }

        let all: AllDocsResponse = response.json().await?;
        Ok(all
            .rows
            .into_iter()
            .filter(|row| !row.id.starts_with("_design/"))
            .filter_map(|row| row.doc)
            .collect())
    }

    async fn find(
        &self,
        db: &str,
        selector: &Selector,
        fields: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        validate_selector(selector)?;
        match self.native_find(db, selector, fields, limit).await {
            Ok(docs) => Ok(docs),
            Err(e) => {
                log::warn!(
                    "CouchDB Mango find failed on {}, falling back to list_all filter: {}",
                    db,
                    e
                );
                let all_docs = self.list_all(db).await?;
                Ok(filter_documents(all_docs, selector, fields, limit))
            }
        }
    }

    async fn ensure_index(&self, db: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let cache_key = (db.to_string(), index.sorted_fields());
        self.ensured_indexes
            .ensure(cache_key, || self.create_index(db, index))
            .await
    }

    fn engine_name(&self) -> &str {
        "couchdb"
    }
}
