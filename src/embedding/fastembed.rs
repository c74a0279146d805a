//! Local embedding provider backed by `fastembed`.
//!
//! Lets an index be built and queried without an API key. The model name is
//! persisted with the index as the `Debug` name of the fastembed model, so
//! [`model_from_name`] can reopen the same model at search time.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Models selectable by name, with their output dimension.
const KNOWN_MODELS: &[(EmbeddingModel, usize)] = &[
    (EmbeddingModel::AllMiniLML6V2, 384),
    (EmbeddingModel::BGESmallENV15, 384),
    (EmbeddingModel::BGEBaseENV15, 768),
    (EmbeddingModel::BGELargeENV15, 1024),
    (EmbeddingModel::NomicEmbedTextV15, 768),
    (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
];

/// Resolve a persisted model name (e.g. "BGESmallENV15") to a fastembed model.
pub fn model_from_name(name: &str) -> Option<EmbeddingModel> {
    KNOWN_MODELS
        .iter()
        .find(|(model, _)| format!("{:?}", model).eq_ignore_ascii_case(name))
        .map(|(model, _)| model.clone())
}

fn dimension_of(model: &EmbeddingModel) -> usize {
    KNOWN_MODELS
        .iter()
        .find(|(known, _)| known == model)
        .map(|(_, dim)| *dim)
        .unwrap_or(384)
}

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// Loaded model; fastembed needs exclusive access while embedding
    model: Arc<Mutex<TextEmbedding>>,

    model_name: String,

    embedding_dimension: usize,
}

impl FastEmbedProvider {
    /// Load a model (default AllMiniLML6V2), downloading it into
    /// `cache_dir` on first use.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the model cannot be loaded
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = dimension_of(&model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }

    /// Load a model by its persisted name.
    pub fn from_name(name: &str, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model = model_from_name(name)
            .ok_or_else(|| {
                EmbeddingError::ConfigError(format!("Unknown FastEmbed model: {}", name))
            })?;
        Self::new(Some(model), cache_dir)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let mut model = self.model.lock().await;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let mut model = self.model.lock().await;
        let owned: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        model
            .embed(owned, None)
            .map_err(|e| EmbeddingError::Other(format!("Batch embedding generation failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_name() {
        assert_eq!(model_from_name("AllMiniLML6V2"), Some(EmbeddingModel::AllMiniLML6V2));
        assert_eq!(model_from_name("bgesmallenv15"), Some(EmbeddingModel::BGESmallENV15));
        assert_eq!(model_from_name("text-embedding-3-small"), None);
    }

    #[test]
    fn test_dimension_of_known_models() {
        assert_eq!(dimension_of(&EmbeddingModel::AllMiniLML6V2), 384);
        assert_eq!(dimension_of(&EmbeddingModel::BGELargeENV15), 1024);
    }

    #[test]
    fn test_from_name_rejects_unknown_model() {
        let result = FastEmbedProvider::from_name("not-a-model", None);
        assert!(matches!(result, Err(EmbeddingError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore = "downloads model weights"]
    async fn test_embed_matches_dimension() {
        let provider = FastEmbedProvider::new(None, None).unwrap();
        let embedding = provider.embed("fast radio burst dispersion measure").await.unwrap();
        assert_eq!(embedding.len(), provider.dimension());
        assert!(provider.embed("").await.is_err());
    }
}
