//! Error taxonomy shared by every storage backend.

use std::fmt;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which half of a hybrid fan-out write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSide {
    Local,
    Cloud,
}

impl fmt::Display for WriteSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteSide::Local => f.write_str("local"),
            WriteSide::Cloud => f.write_str("cloud"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Medium unreachable: storage disabled, network down, backend unconfigured.
    #[error("Storage not available: {0}")]
    NotAvailable(String),

    /// Cloud operation attempted without a session.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Operation attempted before `initialize()` completed or after `disconnect()`.
    #[error("Storage not ready: {0}")]
    NotReady(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// One of the two hybrid fan-out writes failed. The other side kept its write.
    #[error("Partial write failure ({failed} write failed): {source}")]
    PartialWriteFailure {
        failed: WriteSide,
        source: Box<Error>,
    },

    #[error("Persisted schema version {found} is newer than supported version {current}")]
    UnsupportedSchemaVersion { found: u32, current: u32 },

    /// The request itself is refused; retrying it unchanged will fail again.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-level failure (quota exceeded, I/O, poisoned lock).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn not_available(message: impl Into<String>) -> Self {
        Self::NotAvailable(message.into())
    }

    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::NotAuthenticated(message.into())
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady(message.into())
    }

    pub fn not_found(entity: impl fmt::Display, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn partial(failed: WriteSide, source: Error) -> Self {
        Self::PartialWriteFailure {
            failed,
            source: Box::new(source),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// True when the write reached local storage but not the cloud.
    ///
    /// In hybrid mode this is the normal offline outcome rather than a failure
    /// the user needs to act on.
    pub fn is_locally_persisted(&self) -> bool {
        matches!(
            self,
            Self::PartialWriteFailure {
                failed: WriteSide::Cloud,
                ..
            }
        )
    }

    /// True when the failure stems from an unreachable medium.
    pub fn is_offline(&self) -> bool {
        match self {
            Self::NotAvailable(_) => true,
            Self::PartialWriteFailure { source, .. } => source.is_offline(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_side_partial_failure_is_locally_persisted() {
        let err = Error::partial(WriteSide::Cloud, Error::not_available("offline"));
        assert!(err.is_locally_persisted());
        assert!(err.is_offline());
    }

    #[test]
    fn local_side_partial_failure_is_not_locally_persisted() {
        let err = Error::partial(WriteSide::Local, Error::storage("quota exceeded"));
        assert!(!err.is_locally_persisted());
        assert!(!err.is_offline());
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = Error::not_found("transaction", "tx-1");
        assert_eq!(err.to_string(), "transaction 'tx-1' not found");
        assert!(err.is_not_found());
    }
}
