//! Error types and result types for store operations.
//!
//! Every fallible operation in the workspace returns [`StoreResult<T>`]. The variants
//! follow the lifecycle of a call: configuration and validation problems are caught
//! before anything is compiled, translation problems while a document is compiled into
//! a backend instruction, and transaction/backend problems while statements execute.

use std::error::Error as StdError;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Boxed source error carried by [`StoreError::Backend`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all possible errors that can occur when interacting with a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store or the call is misconfigured (missing connection, empty table name,
    /// a sharded range without both bounds, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The request is well-formed but not acceptable (several filter documents where one
    /// is expected, invalid index spec, invalid identifier, ...).
    #[error("Validation error: {0}")]
    Validation(String),
    /// Nothing matched an update that expected a match.
    /// The first argument describes what was looked up, the second is the collection name.
    #[error("Nothing matched {0} in collection {1}")]
    NotFound(String, String),
    /// A filter, update or pipeline document could not be translated.
    #[error("Translation error: {0}")]
    Translation(String),
    /// Beginning, committing or rolling back a transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// The call context was canceled or its deadline passed.
    #[error("Canceled: {0}")]
    Canceled(String),
    /// Serialization/deserialization error when converting between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the underlying storage engine, wrapped with the operation
    /// that was running.
    #[error("Backend error during {operation}: {source}")]
    Backend {
        operation: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    /// Wraps a backend error with the name of the operation that produced it.
    pub fn backend<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        StoreError::Backend { operation: operation.into(), source: source.into() }
    }

    /// Shorthand for [`StoreError::Translation`].
    pub fn translation(message: impl Into<String>) -> Self {
        StoreError::Translation(message.into())
    }

    /// Shorthand for [`StoreError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Shorthand for [`StoreError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        StoreError::Configuration(message.into())
    }

    /// Returns `true` for the "query returned nothing" sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(..))
    }

    /// Returns `true` when the error was raised before any statement could be issued.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            StoreError::Configuration(_) | StoreError::Validation(_) | StoreError::Translation(_)
        )
    }
}

/// A specialized `Result` type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
