//! Post-retrieval filtering and re-ranking.
//!
//! Two filters run on every query:
//!
//! - the abstract side keeps candidates at or above a fixed score threshold
//!   ([`rearrange_query_results`]);
//! - the citation side derives its threshold from a percentile of the
//!   query's own score distribution, then groups surviving reasons by paper
//!   and ranks papers by how many of their reasons survived
//!   ([`filter_citation_results`]). A paper cited for many reasons that
//!   match the query outranks a paper with a single strong match.
//!
//! Everything here is pure: no I/O, no shared state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{CitationHit, DocId, RetrievalCandidate};

/// Separator between reasons in an aggregated citation row.
pub const REASON_SEPARATOR: &str = ";";

/// Anything carrying a similarity score.
pub trait Scored {
    fn score(&self) -> f32;
}

impl Scored for RetrievalCandidate {
    fn score(&self) -> f32 {
        self.score
    }
}

impl Scored for CitationHit {
    fn score(&self) -> f32 {
        self.best_score
    }
}

/// Drop every result scoring below `score_threshold`.
///
/// With `sort` the survivors are reordered by descending score (stable for
/// equal scores); otherwise retrieval order is kept.
pub fn rearrange_query_results<T: Scored>(
    results: Vec<T>,
    score_threshold: f32,
    sort: bool,
) -> Vec<T> {
    let mut kept: Vec<T> = results
        .into_iter()
        .filter(|r| r.score() >= score_threshold)
        .collect();

    if sort {
        kept.sort_by(|a, b| b.score().total_cmp(&a.score()));
    }
    kept
}

/// The `p`-th percentile of `values`, interpolating linearly between the
/// two closest ranks.
///
/// Returns `None` for an empty slice or a `p` outside `[0, 100]`.
pub fn percentile(values: &[f32], p: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }

    let mut sorted: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Shape of a query's raw citation score distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Number of raw candidates
    pub count: usize,
    pub min: f32,
    pub max: f32,

    /// Absolute score cutoff derived from the percentile
    pub cutoff: f64,
}

/// Summarize `candidates` and compute the cutoff for percentile `p`.
///
/// Returns `None` when there are no candidates or `p` is out of range.
pub fn citation_cutoff(candidates: &[RetrievalCandidate], p: f64) -> Option<ScoreSummary> {
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    let cutoff = percentile(&scores, p)?;

    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    Some(ScoreSummary {
        count: scores.len(),
        min,
        max,
        cutoff,
    })
}

/// Keep the citation reasons scoring at or above the `p`-th percentile of
/// all raw scores, and collapse them into one row per paper.
///
/// Each row carries the `;`-joined surviving reasons and their count. Rows
/// are sorted by descending count; papers with equal counts keep the order
/// in which they first appeared in `candidates`.
pub fn filter_citation_results(candidates: Vec<RetrievalCandidate>, p: f64) -> Vec<CitationHit> {
    let Some(summary) = citation_cutoff(&candidates, p) else {
        return Vec::new();
    };

    let survivors = candidates
        .into_iter()
        .filter(|c| f64::from(c.score) >= summary.cutoff);

    let mut hits = group_by_doc(survivors);
    hits.sort_by(|a, b| b.count.cmp(&a.count));
    hits
}

/// Group candidates by `doc_id` in first-appearance order.
fn group_by_doc(candidates: impl IntoIterator<Item = RetrievalCandidate>) -> Vec<CitationHit> {
    let mut position: HashMap<DocId, usize> = HashMap::new();
    let mut hits: Vec<CitationHit> = Vec::new();

    for candidate in candidates {
        match position.get(&candidate.doc_id) {
            Some(&i) => {
                let hit = &mut hits[i];
                hit.reasons.push_str(REASON_SEPARATOR);
                hit.reasons.push_str(&candidate.text);
                hit.count += 1;
                hit.best_score = hit.best_score.max(candidate.score);
            }
            None => {
                position.insert(candidate.doc_id, hits.len());
                hits.push(CitationHit {
                    doc_id: candidate.doc_id,
                    reasons: candidate.text,
                    count: 1,
                    best_score: candidate.score,
                });
            }
        }
    }
    hits
}
