//! Query-time search context.
//!
//! [`CitationSearch`] owns everything a query needs for the lifetime of the
//! process: both metadata tables and both retrievers. Each call to
//! [`CitationSearch::search`] runs the query through the citation-reason
//! retriever and the abstract retriever, filters both candidate lists, and
//! joins the surviving rows to their table records.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{AbstractRecord, CitationHit, CitationRecord, RelevanceLevel};
use crate::provider::{AbstractTable, CitationTable};
use crate::query::{QueryError, Retriever};
use crate::ranking::{
    citation_cutoff, filter_citation_results, rearrange_query_results, ScoreSummary,
    REASON_SEPARATOR,
};

/// Percentile range offered to users for the citation-side cutoff.
pub const PERCENTILE_RANGE: RangeInclusive<f64> = 99.0..=99.8;

/// Errors that can occur while answering a query.
#[derive(Debug, Error)]
pub enum SearchError {
    /// A retriever failed; nothing is shown for this query
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] QueryError),

    #[error("Percentile must be within [0, 100], got {0}")]
    InvalidPercentile(f64),
}

/// Result type for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Tunables for filtering and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Fixed cutoff for abstract-side scores
    pub abstract_score_threshold: f32,

    /// Default percentile for the citation-side cutoff
    pub citation_percentile: f64,

    /// Rows shown per side
    pub display_limit: usize,

    /// Characters of aggregated reasons shown before truncation
    pub reasons_char_limit: usize,

    /// Characters of an abstract shown before truncation
    pub abstract_char_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            abstract_score_threshold: 0.8,
            citation_percentile: 99.7,
            display_limit: 5,
            reasons_char_limit: 500,
            abstract_char_limit: 800,
        }
    }
}

/// A citation-side row joined to its citation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationMatch {
    pub record: CitationRecord,
    #[serde(flatten)]
    pub hit: CitationHit,
}

impl CitationMatch {
    /// Individual reasons, for display one per line.
    pub fn reasons(&self) -> Vec<&str> {
        split_reasons(&self.hit.reasons)
    }
}

/// An abstract-side row joined to its abstract record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractMatch {
    pub record: AbstractRecord,
    pub score: f32,
    pub relevance: RelevanceLevel,
}

/// Ranked results of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Papers ranked by number of matching citation reasons
    pub citations: Vec<CitationMatch>,

    /// Papers whose title/abstract scored above the fixed threshold
    pub abstracts: Vec<AbstractMatch>,

    /// Raw citation score distribution; `None` when the index returned nothing
    pub citation_scores: Option<ScoreSummary>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty() && self.abstracts.is_empty()
    }
}

/// Process-scoped search state: two read-only tables and two retrievers.
pub struct CitationSearch<C, A>
where
    C: Retriever,
    A: Retriever,
{
    citations: CitationTable,
    abstracts: AbstractTable,
    citation_retriever: C,
    abstract_retriever: A,
    settings: SearchSettings,
}

impl<C, A> CitationSearch<C, A>
where
    C: Retriever,
    A: Retriever,
{
    pub fn new(
        citations: CitationTable,
        abstracts: AbstractTable,
        citation_retriever: C,
        abstract_retriever: A,
        settings: SearchSettings,
    ) -> Self {
        Self {
            citations,
            abstracts,
            citation_retriever,
            abstract_retriever,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn citation_table(&self) -> &CitationTable {
        &self.citations
    }

    pub fn abstract_table(&self) -> &AbstractTable {
        &self.abstracts
    }

    /// Answer `query` with the citation-side cutoff at `percentile`.
    ///
    /// A blank query performs no retrieval and yields `Ok(None)`.
    ///
    /// # Errors
    /// `SearchError::InvalidPercentile` for a percentile outside `[0, 100]`;
    /// `SearchError::Retrieval` if either retriever fails, in which case no
    /// partial results are returned
    pub async fn search(
        &self,
        query: &str,
        percentile: f64,
    ) -> SearchResult<Option<SearchOutcome>> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Empty query, skipping retrieval");
            return Ok(None);
        }
        if !(0.0..=100.0).contains(&percentile) {
            return Err(SearchError::InvalidPercentile(percentile));
        }

        let citation_candidates = self.citation_retriever.retrieve(query).await?;
        let abstract_candidates = self.abstract_retriever.retrieve(query).await?;
        info!(
            "Query '{}': {} citation candidates, {} abstract candidates",
            query,
            citation_candidates.len(),
            abstract_candidates.len()
        );

        let abstract_kept = rearrange_query_results(
            abstract_candidates,
            self.settings.abstract_score_threshold,
            false,
        );

        let citation_scores = citation_cutoff(&citation_candidates, percentile);
        if let Some(summary) = &citation_scores {
            debug!(
                "Citation scores: n={} min={:.4} max={:.4} cutoff={:.4}",
                summary.count, summary.min, summary.max, summary.cutoff
            );
        }
        let hits = filter_citation_results(citation_candidates, percentile);

        let citations = hits
            .into_iter()
            .filter_map(|hit| match self.citations.get(hit.doc_id) {
                Some(record) => Some(CitationMatch {
                    record: record.clone(),
                    hit,
                }),
                None => {
                    warn!("Citation doc_id {} has no table record", hit.doc_id);
                    None
                }
            })
            .collect();

        let abstracts = abstract_kept
            .into_iter()
            .filter_map(|candidate| match self.abstracts.get(candidate.doc_id) {
                Some(record) => Some(AbstractMatch {
                    record: record.clone(),
                    score: candidate.score,
                    relevance: RelevanceLevel::from_score(candidate.score),
                }),
                None => {
                    warn!("Abstract doc_id {} has no table record", candidate.doc_id);
                    None
                }
            })
            .collect();

        Ok(Some(SearchOutcome {
            citations,
            abstracts,
            citation_scores,
        }))
    }
}

/// Split an aggregated reasons string into trimmed, non-empty reasons.
pub fn split_reasons(reasons: &str) -> Vec<&str> {
    reasons
        .split(REASON_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect()
}

/// Shorten `text` to at most `limit` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}
