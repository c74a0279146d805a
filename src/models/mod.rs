//! Core data models for the citation search system.
//!
//! This module contains the fundamental data structures shared across the
//! application: the two metadata tables' rows, the candidates produced by
//! retrievers, and the grouped rows produced by the ranking step.

use serde::{Deserialize, Serialize};

/// Key shared between a retrieval candidate and its source metadata table.
pub type DocId = i64;

/// One row of the citation table.
///
/// Each row describes a cited paper together with the reasons other papers
/// gave for citing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationRecord {
    /// Table key; assigned from the row position when the source has no `doc_id` column
    #[serde(default)]
    pub doc_id: Option<DocId>,

    /// arXiv identifier of the cited paper
    pub arxiv_id: String,

    /// Formatted reference text (e.g. "Lorimer et al. 2007")
    pub txt_ref: String,

    /// Semicolon-separated reasons for citing the paper
    #[serde(default)]
    pub reasons: String,
}

/// One row of the abstract table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbstractRecord {
    /// Table key; assigned from the row position when the source has no `doc_id` column
    #[serde(default)]
    pub doc_id: Option<DocId>,

    /// arXiv identifier of the paper
    pub arxiv_id: String,

    /// Author list as a single display string
    pub authors: String,

    /// Paper title
    pub title: String,

    /// Abstract text
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// Which of the two retrieval indexes a node or store belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Index over the reasons for citing a paper
    Citation,

    /// Index over paper titles and abstracts
    Abstract,
}

impl IndexKind {
    /// File name of this index inside an index store directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            IndexKind::Citation => "citation.db",
            IndexKind::Abstract => "abstract.db",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Citation => write!(f, "citation"),
            IndexKind::Abstract => write!(f, "abstract"),
        }
    }
}

/// A persisted entry of a vector index.
///
/// Citation indexes hold one node per citation reason, abstract indexes one
/// node per paper. Several nodes may share a `doc_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexNode {
    /// Storage-assigned node id
    pub id: Option<i64>,

    /// Key into the corresponding metadata table
    pub doc_id: DocId,

    /// Text that was embedded
    pub text: String,

    /// Embedding of `text`; present on every node read back from storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl IndexNode {
    /// Create a node that has not been embedded yet.
    pub fn new(doc_id: DocId, text: impl Into<String>) -> Self {
        Self {
            id: None,
            doc_id,
            text: text.into(),
            embedding: None,
        }
    }
}

/// A single candidate returned by a retriever for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalCandidate {
    /// Key into the table backing the index that produced this candidate
    pub doc_id: DocId,

    /// Cosine similarity between the query and the node text
    pub score: f32,

    /// Matched node text; for citation candidates these are the reasons
    pub text: String,
}

impl RetrievalCandidate {
    pub fn new(doc_id: DocId, score: f32, text: impl Into<String>) -> Self {
        Self {
            doc_id,
            score,
            text: text.into(),
        }
    }
}

/// One paper on the citation side after grouping surviving candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationHit {
    /// Key into the citation table
    pub doc_id: DocId,

    /// All surviving reasons for this paper, joined with `;`
    pub reasons: String,

    /// Number of surviving reasons; the rank key
    pub count: usize,

    /// Highest surviving score in the group
    pub best_score: f32,
}

/// Relevance classification for abstract-side results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Lower similarity but still relevant
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// Configuration for the embedding model.
///
/// Stored alongside each index so that query-time embedding uses the same
/// model the index was built with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model (e.g., "text-embedding-3-small")
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_level_from_score() {
        assert_eq!(RelevanceLevel::from_score(0.96), RelevanceLevel::Identical);
        assert_eq!(RelevanceLevel::from_score(0.90), RelevanceLevel::HighlySimilar);
        assert_eq!(RelevanceLevel::from_score(0.75), RelevanceLevel::Similar);
        assert_eq!(RelevanceLevel::from_score(0.60), RelevanceLevel::Relevant);
    }

    #[test]
    fn test_index_kind_file_names_differ() {
        assert_eq!(IndexKind::Citation.file_name(), "citation.db");
        assert_eq!(IndexKind::Abstract.file_name(), "abstract.db");
        assert_eq!(IndexKind::Citation.to_string(), "citation");
    }

    #[test]
    fn test_abstract_record_serializes_abstract_column() {
        let record = AbstractRecord {
            doc_id: Some(1),
            arxiv_id: "2301.00001".to_string(),
            authors: "A. Author".to_string(),
            title: "A title".to_string(),
            abstract_text: "Some abstract".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["abstract"], "Some abstract");
    }
}
