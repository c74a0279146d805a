//! Persisted vector index storage.
//!
//! An index is a set of embedded [`IndexNode`]s plus the [`EmbeddingConfig`]
//! used to build it. The citation and abstract indexes live in separate
//! stores inside one index directory (see [`index_path`]).

pub mod sqlite;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{DocId, EmbeddingConfig, IndexKind, IndexNode};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be opened, or was used before `initialize`
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Stored config or embedding bytes could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    /// A node with the same `doc_id` and normalized text already exists
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Unexpected storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of one index inside an index store directory.
pub fn index_path(store_dir: &Path, kind: IndexKind) -> PathBuf {
    store_dir.join(kind.file_name())
}

/// Backend that persists one vector index.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Open the store and create its schema. Idempotent.
    async fn initialize(&mut self) -> StorageResult<()>;

    /// Persist the embedding configuration the index is built with.
    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// The stored embedding configuration, if any.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Insert an embedded node and return its id.
    ///
    /// Nodes are identified by `doc_id` plus their text after
    /// [`normalize_text`](crate::embedding::normalize_text); the text itself
    /// is stored unchanged.
    ///
    /// # Errors
    /// `StorageError::DuplicateEntry` when a node with the same identity exists;
    /// `StorageError::SerializationError` when the node has no embedding
    async fn insert_node(&mut self, node: &IndexNode) -> StorageResult<i64>;

    /// Whether a node with this `doc_id` and the same normalized text is stored.
    async fn exists_node(&self, doc_id: DocId, text: &str) -> StorageResult<bool>;

    /// All nodes with their embeddings, in insertion order.
    async fn get_all_nodes(&self) -> StorageResult<Vec<IndexNode>>;

    async fn count_nodes(&self) -> StorageResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_path() {
        let dir = Path::new("/data/index");
        assert_eq!(index_path(dir, IndexKind::Citation), PathBuf::from("/data/index/citation.db"));
        assert_eq!(index_path(dir, IndexKind::Abstract), PathBuf::from("/data/index/abstract.db"));
    }
}
