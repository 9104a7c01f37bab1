//! Storage Errors
//!
//! `TigerStyle`: Explicit error types with context.

use thiserror::Error;

/// Errors from statement storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// `get_random` was called on a store with no statements
    #[error("storage is empty: no statements to choose from")]
    EmptyStorage,

    /// Validation error (bad field name, reserved extra key, ...)
    #[error("validation error: {message}")]
    Validation {
        /// Validation error message
        message: String,
    },

    /// Configuration error (unknown backend, backend not compiled in, ...)
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Connection error
    #[error("connection error: {message}")]
    Connection {
        /// Connection error message
        message: String,
    },

    /// Query error
    #[error("query error: {message}")]
    Query {
        /// Query error message
        message: String,
    },

    /// Record could not be converted to or from the engine's representation
    #[error("serialization error: {message}")]
    Serialization {
        /// Serialization error message
        message: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl StorageError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a read error (wraps query error for reads).
    #[must_use]
    pub fn read(message: impl Into<String>) -> Self {
        Self::Query {
            message: format!("read: {}", message.into()),
        }
    }

    /// Create a write error (wraps query error for writes).
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Query {
            message: format!("write: {}", message.into()),
        }
    }

    /// Check if this is a transient error (a caller may retry).
    ///
    /// Nothing in this crate retries; the classification is for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this is the empty-storage condition.
    #[must_use]
    pub fn is_empty_storage(&self) -> bool {
        matches!(self, Self::EmptyStorage)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = StorageError::validation("empty order field");
        assert!(
            matches!(err, StorageError::Validation { message } if message == "empty order field")
        );

        let err = StorageError::write("duplicate");
        assert!(matches!(err, StorageError::Query { message } if message == "write: duplicate"));
    }

    #[test]
    fn test_is_transient() {
        assert!(StorageError::connection("refused").is_transient());

        assert!(!StorageError::query("syntax error").is_transient());
        assert!(!StorageError::EmptyStorage.is_transient());
        assert!(!StorageError::validation("bad").is_transient());
    }

    #[test]
    fn test_empty_storage_display() {
        let err = StorageError::EmptyStorage;
        assert!(err.is_empty_storage());
        assert!(err.to_string().contains("empty"));
    }
}
