//! Index building.
//!
//! Turns the metadata tables into the two persisted vector indexes:
//!
//! - the citation index gets one node per reason (the `reasons` column split
//!   on `;`), so a paper cited for several reasons has several nodes;
//! - the abstract index gets one node per paper, embedding title and
//!   abstract together.
//!
//! ```ignore
//! let storage = SqliteStorage::new(index_path(dir, IndexKind::Citation));
//! let mut builder = IndexBuilder::initialize_new(provider, storage, None).await?;
//! let stats = builder.ingest_nodes(&citation_nodes(&citations)).await?;
//! ```

use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::{normalize_text, EmbeddingProvider};
use crate::models::{EmbeddingConfig, IndexKind, IndexNode};
use crate::provider::{AbstractTable, CitationTable};
use crate::search::split_reasons;
use crate::storage::{IndexStorage, StorageError};

/// Default number of nodes embedded per request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Errors that can occur during index building.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    /// Missing or mismatched embedding configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Outcome counts of one ingestion run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestionStats {
    pub total_processed: usize,
    pub inserted: usize,
    pub duplicates_skipped: usize,
    pub failed: usize,
}

impl IngestionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inserted(&mut self) {
        self.total_processed += 1;
        self.inserted += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.total_processed += 1;
        self.duplicates_skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.total_processed += 1;
        self.failed += 1;
    }

    /// Add another run's counts to this one.
    pub fn merge(&mut self, other: &IngestionStats) {
        self.total_processed += other.total_processed;
        self.inserted += other.inserted;
        self.duplicates_skipped += other.duplicates_skipped;
        self.failed += other.failed;
    }
}

/// One node per citation reason.
pub fn citation_nodes(table: &CitationTable) -> Vec<IndexNode> {
    table
        .iter()
        .flat_map(|(doc_id, record)| {
            split_reasons(&record.reasons)
                .into_iter()
                .map(move |reason| IndexNode::new(doc_id, reason))
        })
        .collect()
}

/// One node per paper: title and abstract on separate lines.
pub fn abstract_nodes(table: &AbstractTable) -> Vec<IndexNode> {
    table
        .iter()
        .filter(|(_, record)| {
            !(record.title.trim().is_empty() && record.abstract_text.trim().is_empty())
        })
        .map(|(doc_id, record)| {
            let text = format!("{}\n{}", record.title.trim(), record.abstract_text.trim());
            IndexNode::new(doc_id, text)
        })
        .collect()
}

/// Nodes for the given index kind.
pub fn nodes_for(
    kind: IndexKind,
    citations: &CitationTable,
    abstracts: &AbstractTable,
) -> Vec<IndexNode> {
    match kind {
        IndexKind::Citation => citation_nodes(citations),
        IndexKind::Abstract => abstract_nodes(abstracts),
    }
}

/// Embeds nodes and writes them into one index store.
pub struct IndexBuilder<E, S>
where
    E: EmbeddingProvider,
    S: IndexStorage,
{
    embedding_provider: E,
    storage: S,
    batch_size: usize,
}

impl<E, S> IndexBuilder<E, S>
where
    E: EmbeddingProvider,
    S: IndexStorage,
{
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    /// Open an existing index and check that `embedding_provider` matches
    /// the model it was built with.
    ///
    /// # Errors
    /// `IngestionError::InvalidInput` if the store has no configuration or
    /// the model name or dimension differ
    pub async fn connect(
        embedding_provider: E,
        mut storage: S,
        batch_size: Option<usize>,
    ) -> IngestionResult<Self> {
        storage
            .initialize()
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        let stored = storage
            .get_config()
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?
            .ok_or_else(|| {
                IngestionError::InvalidInput(
                    "Index has no embedding configuration. Use initialize_new() for a new index."
                        .to_string(),
                )
            })?;

        let provided = Self::extract_config(&embedding_provider);
        if provided.model_name != stored.model_name {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding model mismatch: provider uses '{}' but index has '{}'",
                provided.model_name, stored.model_name
            )));
        }
        if provided.dimension != stored.dimension {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding dimension mismatch: provider has {} but index has {}",
                provided.dimension, stored.dimension
            )));
        }

        Ok(Self {
            embedding_provider,
            storage,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        })
    }

    /// Create the index schema and record the provider's configuration.
    pub async fn initialize_new(
        embedding_provider: E,
        mut storage: S,
        batch_size: Option<usize>,
    ) -> IngestionResult<Self> {
        storage
            .initialize()
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        let config = Self::extract_config(&embedding_provider);
        storage
            .store_config(&config)
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        Ok(Self {
            embedding_provider,
            storage,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Consume the builder, returning the store.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Embed and store `nodes`.
    ///
    /// Node text is stored trimmed but otherwise as given; the normalized
    /// text is what gets embedded and what identifies a node. Nodes already
    /// present (same `doc_id` and normalized text, including repeats within
    /// `nodes`) are skipped. A failed insert is counted and logged; an
    /// embedding failure aborts the run.
    pub async fn ingest_nodes(&mut self, nodes: &[IndexNode]) -> IngestionResult<IngestionStats> {
        self.ingest_nodes_with_progress(nodes, |_| {}).await
    }

    /// Like [`ingest_nodes`](Self::ingest_nodes), calling `on_batch` with the
    /// running totals after every batch.
    pub async fn ingest_nodes_with_progress<F>(
        &mut self,
        nodes: &[IndexNode],
        mut on_batch: F,
    ) -> IngestionResult<IngestionStats>
    where
        F: FnMut(&IngestionStats),
    {
        let mut stats = IngestionStats::new();

        for chunk in nodes.chunks(self.batch_size) {
            // Stored nodes keep the source text; keys and embeddings use the normalized form.
            let mut pending: Vec<IndexNode> = Vec::new();
            let mut keys: Vec<String> = Vec::new();

            for node in chunk {
                let key = normalize_text(&node.text);
                let exists = self
                    .storage
                    .exists_node(node.doc_id, &key)
                    .await
                    .map_err(|e| IngestionError::StorageError(e.to_string()))?;
                let repeated = pending
                    .iter()
                    .zip(&keys)
                    .any(|(p, k)| p.doc_id == node.doc_id && *k == key);

                if exists || repeated || key.is_empty() {
                    stats.record_duplicate();
                } else {
                    pending.push(IndexNode::new(node.doc_id, node.text.trim()));
                    keys.push(key);
                }
            }

            if pending.is_empty() {
                on_batch(&stats);
                continue;
            }

            let texts: Vec<&str> = keys.iter().map(String::as_str).collect();
            let embeddings = self
                .embedding_provider
                .embed_batch(&texts)
                .await
                .map_err(|e| IngestionError::EmbeddingError(e.to_string()))?;

            if embeddings.len() != pending.len() {
                return Err(IngestionError::EmbeddingError(format!(
                    "Requested {} embeddings, received {}",
                    pending.len(),
                    embeddings.len()
                )));
            }

            for (mut node, embedding) in pending.into_iter().zip(embeddings) {
                node.embedding = Some(embedding);
                match self.storage.insert_node(&node).await {
                    Ok(_) => stats.record_inserted(),
                    Err(StorageError::DuplicateEntry(_)) => stats.record_duplicate(),
                    Err(e) => {
                        warn!("Failed to insert node for doc_id {}: {}", node.doc_id, e);
                        stats.record_failed();
                    }
                }
            }

            debug!(
                "Batch done: {} inserted, {} duplicates, {} failed so far",
                stats.inserted, stats.duplicates_skipped, stats.failed
            );
            on_batch(&stats);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::models::{AbstractRecord, CitationRecord, DocId};
    use crate::provider::Table;
    use crate::storage::StorageResult;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct MockEmbeddingProvider {
        model_name: String,
        dimension: usize,
        batch_calls: Arc<Mutex<Vec<usize>>>,
        embedded: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new(model_name: &str, dimension: usize) -> Self {
            Self {
                model_name: model_name.to_string(),
                dimension,
                batch_calls: Arc::new(Mutex::new(Vec::new())),
                embedded: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
            }
        }

        fn failing(mut self) -> Self {
            self.should_fail = true;
            self
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.5; self.dimension])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.batch_calls.lock().unwrap().push(texts.len());
            self.embedded.lock().unwrap().extend(texts.iter().map(|t| t.to_string()));
            if self.should_fail {
                return Err(EmbeddingError::ApiError("rate limited".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    #[derive(Default)]
    struct MockStorageState {
        nodes: Vec<IndexNode>,
        keys: HashSet<(DocId, String)>,
        config: Option<EmbeddingConfig>,
        initialized: bool,
    }

    #[derive(Clone, Default)]
    struct MockStorage {
        state: Arc<Mutex<MockStorageState>>,
    }

    impl MockStorage {
        fn with_config(model_name: &str, dimension: usize) -> Self {
            let storage = Self::default();
            storage.state.lock().unwrap().config = Some(EmbeddingConfig {
                model_name: model_name.to_string(),
                dimension,
            });
            storage
        }
    }

    #[async_trait]
    impl IndexStorage for MockStorage {
        async fn initialize(&mut self) -> StorageResult<()> {
            self.state.lock().unwrap().initialized = true;
            Ok(())
        }

        async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()> {
            self.state.lock().unwrap().config = Some(config.clone());
            Ok(())
        }

        async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
            Ok(self.state.lock().unwrap().config.clone())
        }

        async fn insert_node(&mut self, node: &IndexNode) -> StorageResult<i64> {
            let mut state = self.state.lock().unwrap();
            if !state.keys.insert((node.doc_id, normalize_text(&node.text))) {
                return Err(StorageError::DuplicateEntry(node.text.clone()));
            }
            state.nodes.push(node.clone());
            Ok(state.nodes.len() as i64)
        }

        async fn exists_node(&self, doc_id: DocId, text: &str) -> StorageResult<bool> {
            Ok(self.state.lock().unwrap().keys.contains(&(doc_id, normalize_text(text))))
        }

        async fn get_all_nodes(&self) -> StorageResult<Vec<IndexNode>> {
            Ok(self.state.lock().unwrap().nodes.clone())
        }

        async fn count_nodes(&self) -> StorageResult<usize> {
            Ok(self.state.lock().unwrap().nodes.len())
        }
    }

    fn citations() -> CitationTable {
        Table::from_rows(vec![
            CitationRecord {
                doc_id: None,
                arxiv_id: "0706.3023".to_string(),
                txt_ref: "Lorimer et al. 2007".to_string(),
                reasons: "First FRB discovery; background on FRBs;".to_string(),
            },
            CitationRecord {
                doc_id: None,
                arxiv_id: "1603.08880".to_string(),
                txt_ref: "Spitler et al. 2016".to_string(),
                reasons: "first repeating FRB".to_string(),
            },
        ])
        .unwrap()
    }

    fn abstracts() -> AbstractTable {
        Table::from_rows(vec![
            AbstractRecord {
                doc_id: None,
                arxiv_id: "2301.00001".to_string(),
                authors: "Doe".to_string(),
                title: "FRB lensing".to_string(),
                abstract_text: "We search for lensed bursts.".to_string(),
            },
            AbstractRecord {
                doc_id: None,
                arxiv_id: "2301.00002".to_string(),
                authors: "Roe".to_string(),
                title: " ".to_string(),
                abstract_text: "".to_string(),
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_citation_nodes_one_per_reason() {
        let nodes = citation_nodes(&citations());
        let pairs: Vec<(DocId, &str)> = nodes.iter().map(|n| (n.doc_id, n.text.as_str())).collect();
        assert_eq!(
            pairs,
            vec![(0, "First FRB discovery"), (0, "background on FRBs"), (1, "first repeating FRB")]
        );
    }

    #[test]
    fn test_abstract_nodes_skip_blank_records() {
        let nodes = abstract_nodes(&abstracts());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "FRB lensing\nWe search for lensed bursts.");
        assert_eq!(nodes_for(IndexKind::Abstract, &citations(), &abstracts()).len(), 1);
    }

    #[test]
    fn test_stats_merge() {
        let mut a = IngestionStats::new();
        a.record_inserted();
        let mut b = IngestionStats::new();
        b.record_duplicate();
        b.record_failed();
        a.merge(&b);
        assert_eq!(a.total_processed, 3);
        assert_eq!((a.inserted, a.duplicates_skipped, a.failed), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_initialize_new_stores_config() {
        let storage = MockStorage::default();
        let provider = MockEmbeddingProvider::new("mock", 4);
        let builder = IndexBuilder::initialize_new(provider, storage.clone(), None).await.unwrap();

        assert_eq!(builder.batch_size(), DEFAULT_BATCH_SIZE);
        let state = storage.state.lock().unwrap();
        assert!(state.initialized);
        assert_eq!(state.config.as_ref().unwrap().model_name, "mock");
    }

    #[tokio::test]
    async fn test_connect_requires_config() {
        let provider = MockEmbeddingProvider::new("mock", 4);
        let result = IndexBuilder::connect(provider, MockStorage::default(), None).await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_mismatched_model() {
        let provider = MockEmbeddingProvider::new("mock", 4);
        let storage = MockStorage::with_config("other", 4);
        let result = IndexBuilder::connect(provider.clone(), storage, None).await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(msg)) if msg.contains("model")));

        let storage = MockStorage::with_config("mock", 8);
        let result = IndexBuilder::connect(provider, storage, None).await;
        assert!(
            matches!(result, Err(IngestionError::InvalidInput(msg)) if msg.contains("dimension"))
        );
    }

    #[tokio::test]
    async fn test_ingest_nodes_embeds_normalized_and_stores_source_text() {
        let provider = MockEmbeddingProvider::new("mock", 4);
        let storage = MockStorage::default();
        let mut builder = IndexBuilder::initialize_new(provider.clone(), storage.clone(), Some(2))
            .await
            .unwrap();

        let stats = builder.ingest_nodes(&citation_nodes(&citations())).await.unwrap();

        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.total_processed, 3);
        assert_eq!(*provider.batch_calls.lock().unwrap(), vec![2, 1]);

        assert_eq!(provider.embedded.lock().unwrap()[0], "first frb discovery");

        let nodes = storage.state.lock().unwrap().nodes.clone();
        assert_eq!(nodes[0].text, "First FRB discovery");
        assert!(nodes.iter().all(|n| n.embedding.as_ref().map(Vec::len) == Some(4)));
    }

    #[tokio::test]
    async fn test_reingest_skips_duplicates() {
        let storage = MockStorage::default();
        let provider = MockEmbeddingProvider::new("mock", 4);
        let mut builder = IndexBuilder::initialize_new(provider, storage, None).await.unwrap();
        let nodes = citation_nodes(&citations());

        builder.ingest_nodes(&nodes).await.unwrap();
        let second = builder.ingest_nodes(&nodes).await.unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates_skipped, 3);
    }

    #[tokio::test]
    async fn test_repeats_within_one_batch_skipped() {
        let storage = MockStorage::default();
        let provider = MockEmbeddingProvider::new("mock", 4);
        let mut builder = IndexBuilder::initialize_new(provider, storage, None).await.unwrap();
        let nodes = vec![IndexNode::new(1, "Same Reason"), IndexNode::new(1, "same   reason")];

        let stats = builder.ingest_nodes(&nodes).await.unwrap();
        assert_eq!((stats.inserted, stats.duplicates_skipped), (1, 1));
        assert_eq!(builder.storage().get_all_nodes().await.unwrap()[0].text, "Same Reason");
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts() {
        let storage = MockStorage::default();
        let provider = MockEmbeddingProvider::new("mock", 4).failing();
        let mut builder = IndexBuilder::initialize_new(provider, storage, None).await.unwrap();

        let result = builder.ingest_nodes(&citation_nodes(&citations())).await;
        assert!(matches!(result, Err(IngestionError::EmbeddingError(_))));
    }

    #[tokio::test]
    async fn test_progress_callback_sees_each_batch() {
        let storage = MockStorage::default();
        let provider = MockEmbeddingProvider::new("mock", 4);
        let mut builder = IndexBuilder::initialize_new(provider, storage, Some(1)).await.unwrap();

        let mut seen = Vec::new();
        builder
            .ingest_nodes_with_progress(&citation_nodes(&citations()), |s| {
                seen.push(s.total_processed)
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
