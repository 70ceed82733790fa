//! Error types for the key/value layer.

use thiserror::Error;

use finsync_core::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage is disabled or cannot be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    fn is_unreachable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::PermissionDenied
                    | rusqlite::ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        if err.is_unreachable() {
            Error::NotAvailable(err.to_string())
        } else {
            Error::Storage(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_maps_to_not_available() {
        let err: Error = StorageError::unavailable("disabled").into();
        assert!(err.is_offline());
    }

    #[test]
    fn poisoned_lock_maps_to_storage_error() {
        let err: Error = StorageError::LockPoisoned("kv".to_string()).into();
        assert!(matches!(err, Error::Storage(_)));
    }
}
