//! Text embedding providers.
//!
//! Both retrieval indexes and every incoming query are turned into vectors
//! through an [`EmbeddingProvider`]. Two implementations ship with the crate:
//! the hosted OpenAI embeddings endpoint and a local FastEmbed model.

pub mod fastembed;
pub mod openai;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::EmbeddingConfig;
use self::fastembed::FastEmbedProvider;
use self::openai::OpenAIEmbedding;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding service rejected the request or could not be reached
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Input text the provider refuses to embed (e.g. empty)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Missing or rejected credential, unknown model, model load failure
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Source of embedding vectors for index nodes and queries.
///
/// The same provider (same `model_name` and `dimension`) must be used to
/// build an index and to query it; the index store persists both values so
/// the search binary can pick the matching provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single, already normalized text.
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embed several texts at once. Output order matches input order.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Number of dimensions in the vectors this provider returns.
    fn dimension(&self) -> usize;

    /// Identifier of the model, persisted with each index.
    fn model_name(&self) -> &str;
}

/// Either of the shipped providers, chosen at runtime.
#[derive(Debug, Clone)]
pub enum DynamicEmbeddingProvider {
    FastEmbed(FastEmbedProvider),
    OpenAI(OpenAIEmbedding),
}

impl DynamicEmbeddingProvider {
    /// Whether indexes built with `model_name` need an API key to query.
    pub fn requires_api_key(model_name: &str) -> bool {
        OpenAIEmbedding::is_openai_model(model_name)
    }

    /// Recreate the provider an index was built with.
    ///
    /// # Errors
    /// `EmbeddingError::ConfigError` if an OpenAI model is configured but no
    /// key is given, the model is unknown, or the provider's dimension
    /// differs from the stored one
    pub fn for_config(
        config: &EmbeddingConfig,
        api_key: Option<&str>,
        cache_dir: Option<PathBuf>,
    ) -> EmbeddingResult<Self> {
        let provider = if Self::requires_api_key(&config.model_name) {
            let key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
                EmbeddingError::ConfigError(format!(
                    "Model {} requires an API key",
                    config.model_name
                ))
            })?;
            Self::OpenAI(OpenAIEmbedding::new(key.to_string(), Some(config.model_name.clone())))
        } else {
            Self::FastEmbed(FastEmbedProvider::from_name(&config.model_name, cache_dir)?)
        };

        if provider.dimension() != config.dimension {
            return Err(EmbeddingError::ConfigError(format!(
                "Dimension mismatch: index expects {}, provider returns {}",
                config.dimension,
                provider.dimension()
            )));
        }
        Ok(provider)
    }
}

#[async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            Self::FastEmbed(p) => p.embed(text).await,
            Self::OpenAI(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            Self::FastEmbed(p) => p.embed_batch(texts).await,
            Self::OpenAI(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::FastEmbed(p) => p.dimension(),
            Self::OpenAI(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::FastEmbed(p) => p.model_name(),
            Self::OpenAI(p) => p.model_name(),
        }
    }
}

/// Normalizes text before it is embedded.
///
/// Lowercases, trims, and collapses runs of whitespace into single spaces.
/// Index nodes and queries both pass through here.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Fast Radio Burst"), "fast radio burst");
        assert_eq!(
            normalize_text("  circumgalactic   medium (CGM) "),
            "circumgalactic medium (cgm)"
        );
        assert_eq!(normalize_text("line\nbreak\ttab"), "line break tab");
        assert_eq!(normalize_text("   "), "");
    }

    fn config(model_name: &str, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: model_name.to_string(),
            dimension,
        }
    }

    #[test]
    fn test_openai_config_needs_key() {
        let small = config("text-embedding-3-small", 1536);
        let result = DynamicEmbeddingProvider::for_config(&small, None, None);
        assert!(matches!(result, Err(EmbeddingError::ConfigError(_))));

        let result = DynamicEmbeddingProvider::for_config(&small, Some(" "), None);
        assert!(matches!(result, Err(EmbeddingError::ConfigError(_))));
    }

    #[test]
    fn test_openai_config_with_key() {
        let large = config("text-embedding-3-large", 3072);
        let provider = DynamicEmbeddingProvider::for_config(&large, Some("sk-test"), None).unwrap();
        assert_eq!(provider.model_name(), "text-embedding-3-large");
        assert!(matches!(provider, DynamicEmbeddingProvider::OpenAI(_)));
    }

    #[test]
    fn test_config_dimension_mismatch() {
        let wrong = config("text-embedding-3-small", 384);
        let result = DynamicEmbeddingProvider::for_config(&wrong, Some("sk-test"), None);
        assert!(
            matches!(result, Err(EmbeddingError::ConfigError(msg)) if msg.contains("Dimension"))
        );
    }

    #[test]
    fn test_requires_api_key() {
        assert!(DynamicEmbeddingProvider::requires_api_key("text-embedding-ada-002"));
        assert!(!DynamicEmbeddingProvider::requires_api_key("BGESmallENV15"));
    }
}
