//! Error types for the cloud document store.

use thiserror::Error;

use finsync_core::Error;

use crate::store::CloudCollection;

/// Result type alias for document store operations.
pub type Result<T> = std::result::Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the document service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Missing or rejected credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Document '{id}' not found in {collection}")]
    NotFound {
        collection: CloudCollection,
        id: String,
    },

    /// Network unreachable or service not configured
    #[error("Cloud unavailable: {0}")]
    Unavailable(String),

    /// A stored document did not have the expected shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl CloudError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(collection: CloudCollection, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<CloudError> for Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Http(e) => Error::NotAvailable(e.to_string()),
            CloudError::Unavailable(message) => Error::NotAvailable(message),
            CloudError::Auth(message) => Error::NotAuthenticated(message),
            CloudError::Json(e) => Error::Serialization(e),
            CloudError::NotFound { collection, id } => match collection.entity_kind() {
                Some(kind) => Error::not_found(kind, id),
                None => Error::not_found(collection, id),
            },
            CloudError::Api { status, message } => match status {
                401 | 403 => Error::NotAuthenticated(message),
                408 | 429 | 500..=599 => Error::NotAvailable(format!("({}) {}", status, message)),
                _ => Error::Storage(format!("Cloud API error ({}): {}", status, message)),
            },
            CloudError::InvalidDocument(message) => Error::Storage(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::model::EntityKind;

    #[test]
    fn rejected_token_maps_to_not_authenticated() {
        let err: Error = CloudError::api(401, "expired").into();
        assert!(matches!(err, Error::NotAuthenticated(_)));
    }

    #[test]
    fn server_errors_are_treated_as_offline() {
        let err: Error = CloudError::api(503, "maintenance").into();
        assert!(err.is_offline());
        assert_eq!(CloudError::api(503, "x").status_code(), Some(503));
    }

    #[test]
    fn missing_document_names_the_entity() {
        let err: Error =
            CloudError::not_found(CloudCollection::for_entity(EntityKind::Budget), "b-1").into();
        assert_eq!(err.to_string(), "budget 'b-1' not found");
    }
}
