//! Error types and result types for document store operations.
//!
//! Errors fall into two classes. Configuration errors ([`DocumentStoreError::Configuration`],
//! [`DocumentStoreError::CollectionNotFound`]) are fatal usage mistakes and are never retried.
//! Everything the underlying store reports is carried unchanged in
//! [`DocumentStoreError::Backend`]. Use [`DocumentStoreResult<T>`] as the return type for
//! fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The store was used in a way its configuration does not allow, e.g. before setup
    /// or without a database name.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The requested collection was never provisioned, or the store is not ready.
    #[error("Collection \"{0}\" was not found or was not initialized")]
    CollectionNotFound(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An index definition clashes with an existing index of the same name or keys.
    /// The first argument is the collection, the second the index name.
    #[error("Index {1} on collection {0} conflicts with an existing definition")]
    IndexConflict(String, String),
    /// The payload does not have the shape the operation requires.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON, TOML).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the underlying storage backend (connectivity, constraint violation, timeout).
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// Returns `true` for the fatal configuration class of errors.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::Configuration(_) | DocumentStoreError::CollectionNotFound(_)
        )
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<TomlError> for DocumentStoreError {
    fn from(err: TomlError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
