//! Error taxonomy shared by every document-store engine and the data store service.
//!
//! Engines translate their native failures into [`StoreError`] so the service never has
//! to inspect backend-specific status codes or revision tokens. The service recovers
//! [`StoreError::NotFound`] locally; everything else is surfaced to the caller.

use std::error::Error;
use std::fmt;

/// Errors produced by [`DocumentStore`](crate::document_store::DocumentStore) engines and
/// the [`DataStoreService`](crate::data_store::DataStoreService).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The requested document does not exist.
    NotFound { db: String, id: String },
    /// A concurrent write won the race for this document (revision mismatch).
    Conflict { db: String, id: String, detail: String },
    /// The backend could not be reached or the connection failed mid-request.
    Transport(String),
    /// The backend answered with an unexpected status.
    Backend { status: u16, message: String },
    /// A query selector could not be expressed (e.g. an empty field name).
    InvalidSelector(String),
    /// A document could not be encoded or decoded.
    Serialization(String),
    /// The store configuration is incomplete or invalid.
    Config(String),
}

impl StoreError {
    pub fn not_found(db: &str, id: &str) -> Self {
        StoreError::NotFound {
            db: db.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(db: &str, id: &str, detail: impl Into<String>) -> Self {
        StoreError::Conflict {
            db: db.to_string(),
            id: id.to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Short machine-readable code used in agent-facing tool results.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::Conflict { .. } => "CONFLICT",
            StoreError::Transport(_) => "TRANSPORT",
            StoreError::Backend { .. } => "BACKEND",
            StoreError::InvalidSelector(_) => "INVALID_SELECTOR",
            StoreError::Serialization(_) => "SERIALIZATION",
            StoreError::Config(_) => "CONFIG",
        }
    }

    /// Turn an unexpected HTTP answer into [`StoreError::Backend`], keeping the body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
        StoreError::Backend { status, message }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { db, id } => {
                write!(f, "Document '{}' not found in '{}'", id, db)
            }
            StoreError::Conflict { db, id, detail } => {
                write!(f, "Document update conflict on '{}' in '{}': {}", id, db, detail)
            }
            StoreError::Transport(msg) => write!(f, "Backend unreachable: {}", msg),
            StoreError::Backend { status, message } => {
                write!(f, "Backend returned status {}: {}", status, message)
            }
            StoreError::InvalidSelector(msg) => write!(f, "Invalid selector: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Serialization(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_classified() {
        let err = StoreError::not_found("agent_data_store", "u1:ns:a2V5");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(
            err.to_string(),
            "Document 'u1:ns:a2V5' not found in 'agent_data_store'"
        );
    }

    #[test]
    fn test_serde_error_converts_to_serialization() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StoreError = parse.into();
        assert_eq!(err.code(), "SERIALIZATION");
    }
}
