//! SQLite index storage.
//!
//! # Schema
//! - `config(key TEXT PRIMARY KEY, value TEXT)`: the embedding config as JSON
//!   under the `embedding` key
//! - `nodes(id INTEGER PRIMARY KEY, doc_id INTEGER, text TEXT, key TEXT, embedding BLOB)`
//!   with `UNIQUE(doc_id, key)`; `key` is the normalized text, embeddings are
//!   little-endian f32 bytes

use super::{IndexStorage, StorageError, StorageResult};
use crate::embedding::normalize_text;
use crate::models::{DocId, EmbeddingConfig, IndexNode};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const CONFIG_KEY: &str = "embedding";

/// SQLite-backed index store.
pub struct SqliteStorage {
    db_path: PathBuf,

    /// Open after `initialize`
    connection: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Create a store for the database at `db_path`. Nothing is opened
    /// until [`IndexStorage::initialize`] runs.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            connection: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn create_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS nodes (
                 id        INTEGER PRIMARY KEY,
                 doc_id    INTEGER NOT NULL,
                 text      TEXT NOT NULL,
                 key       TEXT NOT NULL,
                 embedding BLOB NOT NULL,
                 UNIQUE(doc_id, key)
             );",
        )
        .map_err(|e| StorageError::SchemaError(e.to_string()))
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(StorageError::SerializationError(format!(
                "Embedding blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Run `f` against the open connection.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| StorageError::Other("Connection lock poisoned".to_string()))?;
        let conn = guard.as_ref().ok_or_else(|| {
            StorageError::ConnectionError(format!("{} is not initialized", self.db_path.display()))
        })?;
        f(conn)
    }
}

fn query_err(e: rusqlite::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

#[async_trait]
impl IndexStorage for SqliteStorage {
    async fn initialize(&mut self) -> StorageResult<()> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            StorageError::ConnectionError(format!("{}: {}", self.db_path.display(), e))
        })?;
        Self::create_schema(&conn)?;
        debug!("Opened index store {}", self.db_path.display());

        let mut guard = self
            .connection
            .lock()
            .map_err(|_| StorageError::Other("Connection lock poisoned".to_string()))?;
        *guard = Some(conn);
        Ok(())
    }

    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![CONFIG_KEY, value],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        let value: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)
        })?;

        value
            .map(|v| {
                serde_json::from_str(&v)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))
            })
            .transpose()
    }

    async fn insert_node(&mut self, node: &IndexNode) -> StorageResult<i64> {
        let embedding = node.embedding.as_ref().ok_or_else(|| {
            StorageError::SerializationError(format!(
                "Node for doc_id {} has no embedding",
                node.doc_id
            ))
        })?;
        let blob = Self::serialize_embedding(embedding);
        let key = normalize_text(&node.text);

        self.with_connection(|conn| {
            let result = conn.execute(
                "INSERT INTO nodes (doc_id, text, key, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![node.doc_id, node.text, key, blob],
            );
            match result {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StorageError::DuplicateEntry(format!(
                        "doc_id {} already has this text",
                        node.doc_id
                    )))
                }
                Err(e) => Err(query_err(e)),
            }
        })
    }

    async fn exists_node(&self, doc_id: DocId, text: &str) -> StorageResult<bool> {
        let key = normalize_text(text);
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM nodes WHERE doc_id = ?1 AND key = ?2)",
                params![doc_id, key],
                |row| row.get(0),
            )
            .map_err(query_err)
        })
    }

    async fn get_all_nodes(&self) -> StorageResult<Vec<IndexNode>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, doc_id, text, embedding FROM nodes ORDER BY id")
                .map_err(query_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, DocId>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })
                .map_err(query_err)?;

            let mut nodes = Vec::new();
            for row in rows {
                let (id, doc_id, text, blob) = row.map_err(query_err)?;
                nodes.push(IndexNode {
                    id: Some(id),
                    doc_id,
                    text,
                    embedding: Some(Self::deserialize_embedding(&blob)?),
                });
            }
            Ok(nodes)
        })
    }

    async fn count_nodes(&self) -> StorageResult<usize> {
        let count: i64 = self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
                .map_err(query_err)
        })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(doc_id: DocId, text: &str, embedding: Vec<f32>) -> IndexNode {
        IndexNode {
            embedding: Some(embedding),
            ..IndexNode::new(doc_id, text)
        }
    }

    async fn open_temp() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SqliteStorage::new(dir.path().join("citation.db"));
        storage.initialize().await.unwrap();
        (dir, storage)
    }

    #[test]
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![0.5, -1.25, 3.0];
        let bytes = SqliteStorage::serialize_embedding(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(SqliteStorage::deserialize_embedding(&bytes).unwrap(), embedding);
        assert!(SqliteStorage::deserialize_embedding(&bytes[..5]).is_err());
    }

    #[tokio::test]
    async fn test_use_before_initialize_fails() {
        let storage = SqliteStorage::new("/nonexistent/never-opened.db");
        let result = storage.count_nodes().await;
        assert!(matches!(result, Err(StorageError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let (_dir, mut storage) = open_temp().await;
        assert!(storage.get_config().await.unwrap().is_none());

        let config = EmbeddingConfig {
            model_name: "text-embedding-3-small".to_string(),
            dimension: 1536,
        };
        storage.store_config(&config).await.unwrap();
        assert_eq!(storage.get_config().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_insert_and_read_nodes() {
        let (_dir, mut storage) = open_temp().await;

        storage.insert_node(&embedded(3, "background on FRBs", vec![1.0, 0.0])).await.unwrap();
        storage.insert_node(&embedded(3, "first repeating FRB", vec![0.0, 1.0])).await.unwrap();
        storage.insert_node(&embedded(7, "host galaxy", vec![0.6, 0.8])).await.unwrap();

        assert_eq!(storage.count_nodes().await.unwrap(), 3);
        assert!(storage.exists_node(3, "first repeating FRB").await.unwrap());
        assert!(storage.exists_node(3, "First  Repeating frb").await.unwrap());
        assert!(!storage.exists_node(7, "first repeating FRB").await.unwrap());

        let nodes = storage.get_all_nodes().await.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].doc_id, 3);
        assert_eq!(nodes[0].text, "background on FRBs");
        assert_eq!(nodes[2].embedding, Some(vec![0.6, 0.8]));
        assert!(nodes.iter().all(|n| n.id.is_some()));
    }

    #[tokio::test]
    async fn test_duplicate_node_rejected() {
        let (_dir, mut storage) = open_temp().await;
        storage.insert_node(&embedded(1, "same reason", vec![1.0])).await.unwrap();

        let result = storage.insert_node(&embedded(1, "same reason", vec![1.0])).await;
        assert!(matches!(result, Err(StorageError::DuplicateEntry(_))));

        let result = storage.insert_node(&embedded(1, "Same  Reason", vec![1.0])).await;
        assert!(matches!(result, Err(StorageError::DuplicateEntry(_))));
        assert!(storage.insert_node(&embedded(2, "Same Reason", vec![1.0])).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_without_embedding_rejected() {
        let (_dir, mut storage) = open_temp().await;
        let result = storage.insert_node(&IndexNode::new(1, "no vector")).await;
        assert!(matches!(result, Err(StorageError::SerializationError(_))));
    }
}
