//! Versioned JSON document store abstraction.
//!
//! Every document carries a monotonically increasing `version`. Writers that
//! must not lose concurrent updates use [`DocumentStore::compare_and_swap`],
//! which only succeeds if the stored version still matches the one the
//! writer read.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("{collection} '{id}' not found")]
    NotFound { collection: String, id: String },

    /// A document with the same id already exists.
    #[error("{collection} '{id}' already exists")]
    AlreadyExists { collection: String, id: String },

    /// Optimistic concurrency retries ran out.
    #[error("Update of {collection} '{id}' still conflicted after {attempts} attempts")]
    ConflictRetriesExhausted {
        collection: String,
        id: String,
        attempts: u32,
    },

    /// Connection to the backing database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A stored document together with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub body: Value,
}

/// Backend-agnostic document storage.
///
/// Versions start at 1 on create and increase by one on every write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document, returning `None` if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Inserts a new document. Fails with `AlreadyExists` on duplicate ids.
    async fn create(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<StoredDocument, StoreError>;

    /// Unconditionally overwrites an existing document.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<StoredDocument, StoreError>;

    /// Overwrites a document only if its version is still `expected_version`.
    ///
    /// Returns `Ok(None)` when the version no longer matches.
    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Lists every document in a collection, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError>;
}
