//! Retrieval over a persisted vector index.
//!
//! A [`Retriever`] turns a query string into scored candidates. The
//! [`VectorIndexRetriever`] embeds the query and scans every node of an
//! [`IndexStorage`], scoring by cosine similarity.
//!
//! ```rust,no_run
//! use citation_search::embedding::openai::OpenAIEmbedding;
//! use citation_search::query::{Retriever, VectorIndexRetriever};
//! use citation_search::storage::{sqlite::SqliteStorage, IndexStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut storage = SqliteStorage::new("index/citation.db");
//! storage.initialize().await?;
//! let provider = OpenAIEmbedding::new("api-key".to_string(), None);
//!
//! let retriever = VectorIndexRetriever::new(provider, storage, None);
//! for candidate in retriever.retrieve("fast radio burst lensing").await? {
//!     println!("{} {:.3}", candidate.doc_id, candidate.score);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::embedding::{normalize_text, EmbeddingProvider};
use crate::models::RetrievalCandidate;
use crate::storage::IndexStorage;

/// Errors that can occur during retrieval.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    /// Query and index vectors have different dimensions
    #[error("Dimension mismatch: query has {query}, node has {node}")]
    DimensionMismatch { query: usize, node: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for retrieval operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Anything that can answer a query with scored candidates.
///
/// Implementations return candidates ordered by descending score.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> QueryResult<Vec<RetrievalCandidate>>;
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for Box<T> {
    async fn retrieve(&self, query: &str) -> QueryResult<Vec<RetrievalCandidate>> {
        (**self).retrieve(query).await
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero magnitude.
///
/// # Errors
/// `QueryError::DimensionMismatch` if the lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> QueryResult<f32> {
    if a.len() != b.len() {
        return Err(QueryError::DimensionMismatch {
            query: a.len(),
            node: b.len(),
        });
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

/// Brute-force retriever over every node of an index.
pub struct VectorIndexRetriever<E, S>
where
    E: EmbeddingProvider,
    S: IndexStorage,
{
    embedding_provider: E,
    storage: S,

    /// Keep only this many best candidates; `None` returns every node
    similarity_top_k: Option<usize>,
}

impl<E, S> VectorIndexRetriever<E, S>
where
    E: EmbeddingProvider,
    S: IndexStorage,
{
    /// `similarity_top_k` of `None` returns the full scored index, which the
    /// citation-side percentile cutoff needs.
    pub fn new(embedding_provider: E, storage: S, similarity_top_k: Option<usize>) -> Self {
        Self {
            embedding_provider,
            storage,
            similarity_top_k,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[async_trait]
impl<E, S> Retriever for VectorIndexRetriever<E, S>
where
    E: EmbeddingProvider,
    S: IndexStorage,
{
    async fn retrieve(&self, query: &str) -> QueryResult<Vec<RetrievalCandidate>> {
        let normalized = normalize_text(query);
        if normalized.is_empty() {
            return Err(QueryError::InvalidQuery("Query is empty".to_string()));
        }

        let query_embedding = self
            .embedding_provider
            .embed(&normalized)
            .await
            .map_err(|e| QueryError::EmbeddingError(e.to_string()))?;

        let nodes = self
            .storage
            .get_all_nodes()
            .await
            .map_err(|e| QueryError::StorageError(e.to_string()))?;

        let mut candidates = Vec::with_capacity(nodes.len());
        for node in nodes {
            let Some(embedding) = node.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(&query_embedding, embedding)?;
            candidates.push(RetrievalCandidate::new(node.doc_id, score, node.text));
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(k) = self.similarity_top_k {
            candidates.truncate(k);
        }

        debug!("Retrieved {} candidates for '{}'", candidates.len(), normalized);
        Ok(candidates)
    }
}
