//! Firestore engine (managed, auto-indexed).
//!
//! Uses the Firestore REST API (v1) through a pooled `reqwest` client. There is no
//! client-visible revision: `save` is a plain overwrite (last write wins) and the
//! write token handed back is the server's `updateTime`. Document ids live only in
//! the resource name, so `_id` is stripped from stored payloads and synthesized onto
//! every document read back. Every field is indexed by the service itself, so
//! `ensure_index` keeps the trait's no-op default.

use crate::agentstore::backends::firestore_value::{decode_fields, encode_fields, encode_value};
use crate::agentstore::document_store::{
    filter_documents, project, validate_selector, Document, DocumentStore, Selector, WriteAck,
    ID_FIELD, REV_FIELD,
};
use crate::agentstore::error::StoreError;
use crate::agentstore::http_client_pool::get_or_create_client;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Public Firestore endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Database id used when none is configured.
pub const DEFAULT_DATABASE: &str = "(default)";

const LIST_PAGE_SIZE: usize = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<FirestoreDocument>,
}

impl FirestoreDocument {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn into_document(self) -> Result<Document, StoreError> {
        let id = self.id().to_string();
        let mut doc = decode_fields(&self.fields)?;
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        Ok(doc)
    }
}

/// [`DocumentStore`] backed by Google Cloud Firestore (or its emulator).
pub struct FirestoreStore {
    documents_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl FirestoreStore {
    /// Build a client for `projects/{project_id}/databases/{database_id}` and verify the
    /// endpoint answers.
    ///
    /// `endpoint` is [`DEFAULT_ENDPOINT`] in production or `http://host:port` for the
    /// emulator. Unreachable endpoints, rejected credentials and missing databases fail
    /// construction.
    pub async fn connect(
        endpoint: &str,
        project_id: &str,
        database_id: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        if project_id.is_empty() {
            return Err(StoreError::Config("Firestore project id is empty".to_string()));
        }
        let endpoint = endpoint.trim_end_matches('/');
        let client = get_or_create_client(endpoint, timeout)?;
        let store = Self {
            documents_url: format!(
                "{}/v1/projects/{}/databases/{}/documents",
                endpoint, project_id, database_id
            ),
            access_token,
            client,
        };

        // Listing collection ids touches the database itself, so a missing database
        // (404) fails here along with rejected credentials.
        let check = store
            .authed(store.client.post(format!("{}:listCollectionIds", store.documents_url)))
            .json(&json!({ "pageSize": 1 }))
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to connect to Firestore at {}: {}", endpoint, e);
                StoreError::Transport(format!("could not connect to Firestore: {}", e))
            })?;
        if !check.status().is_success() {
            let err = StoreError::from_response(check).await;
            log::error!("Firestore rejected the connection check: {}", err);
            return Err(err);
        }

        log::info!("Successfully connected to Firestore project '{}'.", project_id);
        Ok(store)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn collection_url(&self, db: &str) -> String {
        format!("{}/{}", self.documents_url, urlencoding::encode(db))
    }

    fn doc_url(&self, db: &str, id: &str) -> String {
        format!("{}/{}", self.collection_url(db), urlencoding::encode(id))
    }

    async fn native_find(
        &self,
        db: &str,
        selector: &Selector,
        fields: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let query = structured_query(db, selector, fields, limit);
        let response = self
            .authed(self.client.post(format!("{}:runQuery", self.documents_url)))
            .json(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }

        let items: Vec<RunQueryItem> = response.json().await?;
        let mut results = Vec::new();
        for item in items {
            let Some(document) = item.document else {
                continue;
            };
            let doc = document.into_document()?;
            match fields {
                Some(fields) if !fields.is_empty() => results.push(project(&doc, fields)),
                _ => results.push(doc),
            }
        }
        Ok(results)
    }
}

/// Field paths that are not plain identifiers must be backtick-quoted.
fn field_path(field: &str) -> String {
    let mut chars = field.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn field_filter(field: &str, value: &Value) -> Value {
    let path = json!({ "fieldPath": field_path(field) });
    if value.is_null() {
        json!({ "unaryFilter": { "op": "IS_NULL", "field": path } })
    } else {
        json!({ "fieldFilter": { "field": path, "op": "EQUAL", "value": encode_value(value) } })
    }
}

/// Translate an equality selector into a `runQuery` request body.
fn structured_query(
    db: &str,
    selector: &Selector,
    fields: Option<&[&str]>,
    limit: usize,
) -> Value {
    let mut query = json!({
        "from": [{ "collectionId": db }],
        "limit": limit.min(i32::MAX as usize),
    });

    let mut filters: Vec<Value> = selector
        .iter()
        .map(|(field, value)| field_filter(field, value))
        .collect();
    match filters.len() {
        0 => {}
        1 => query["where"] = filters.remove(0),
        _ => {
            query["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } })
        }
    }

    if let Some(fields) = fields.filter(|f| !f.is_empty()) {
        let paths: Vec<Value> = fields
            .iter()
            .filter(|f| **f != ID_FIELD)
            .map(|f| json!({ "fieldPath": field_path(f) }))
            .collect();
        query["select"] = json!({ "fields": paths });
    }

    json!({ "structuredQuery": query })
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, db: &str, id: &str) -> Result<Document, StoreError> {
        let response = self.authed(self.client.get(self.doc_url(db, id))).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(db, id)),
            status if status.is_success() => {
                let document: FirestoreDocument = response.json().await?;
                document.into_document()
            }
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn save(&self, db: &str, id: &str, mut doc: Document) -> Result<WriteAck, StoreError> {
        doc.remove(ID_FIELD);
        doc.remove(REV_FIELD);
        let response = self
            .authed(self.client.patch(self.doc_url(db, id)))
            .json(&json!({ "fields": encode_fields(&doc) }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::from_response(response).await);
        }

        let written: FirestoreDocument = response.json().await?;
        Ok(WriteAck {
            id: id.to_string(),
            rev: written.update_time.unwrap_or_default(),
        })
    }

    async fn delete(&self, db: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .authed(self.client.delete(self.doc_url(db, id)))
            .query(&[("currentDocument.exists", "true")])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(db, id)),
            status if status.is_success() => Ok(()),
            _ => Err(StoreError::from_response(response).await),
        }
    }

    async fn list_all(&self, db: &str) -> Result<Vec<Document>, StoreError> {
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .authed(self.client.get(self.collection_url(db)))
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(StoreError::from_response(response).await);
            }
            let page: ListDocumentsResponse = response.json().await?;
            for document in page.documents {
                results.push(document.into_document()?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(results)
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
                    "Firestore find failed on {}, falling back to list_all filter: {}",
                    db,
                    e
                );
                let all_docs = self.list_all(db).await?;
                Ok(filter_documents(all_docs, selector, fields, limit))
            }
        }
    }

    fn engine_name(&self) -> &str {
        "firestore"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentstore::document_store::selector;

    #[test]
    fn test_field_path_quoting() {
        assert_eq!(field_path("userId"), "userId");
        assert_eq!(field_path("_id"), "_id");
        assert_eq!(field_path("my-field"), "`my-field`");
        assert_eq!(field_path("9lives"), "`9lives`");
    }

    #[test]
    fn test_structured_query_single_filter() {
        let query = structured_query("agent_data_store", &selector([("userId", "u1")]), None, 50);
        let sq = &query["structuredQuery"];
        assert_eq!(sq["from"][0]["collectionId"], "agent_data_store");
        assert_eq!(sq["limit"], 50);
        assert_eq!(sq["where"]["fieldFilter"]["field"]["fieldPath"], "userId");
        assert_eq!(sq["where"]["fieldFilter"]["value"]["stringValue"], "u1");
        assert!(sq.get("select").is_none());
    }

    #[test]
    fn test_structured_query_composite_and_select() {
        let sel = selector([("userId", "u1"), ("namespace", "files")]);
        let query = structured_query("db", &sel, Some(&["key", "_id"][..]), 10);
        let sq = &query["structuredQuery"];
        assert_eq!(sq["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            sq["where"]["compositeFilter"]["filters"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(sq["select"]["fields"], json!([{"fieldPath": "key"}]));
    }

    #[test]
    fn test_null_selector_value_uses_unary_filter() {
        let sel = selector([("namespace", Value::Null)]);
        let query = structured_query("db", &sel, None, 10);
        assert_eq!(query["structuredQuery"]["where"]["unaryFilter"]["op"], "IS_NULL");
    }

    #[test]
    fn test_document_id_from_resource_name() {
        let doc = FirestoreDocument {
            name: "projects/p/databases/(default)/documents/agent_data_store/u1:ns:YQ==".into(),
            fields: Map::new(),
            update_time: None,
        };
        assert_eq!(doc.id(), "u1:ns:YQ==");
    }
}
