//! Metadata table providers.
//!
//! The citation table and the abstract table are loaded once at start-up and
//! then only read. Both are keyed by `doc_id` so that retrieval candidates
//! resolve to their records by lookup, never by row position.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{AbstractRecord, CitationRecord, DocId};

pub mod csv;

/// Errors that can occur when loading a table.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed rows, missing columns, duplicate keys
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A row type that can live in a [`Table`].
pub trait TableRow {
    /// Key carried by the source row, if it had one.
    fn doc_id(&self) -> Option<DocId>;

    fn set_doc_id(&mut self, doc_id: DocId);
}

impl TableRow for CitationRecord {
    fn doc_id(&self) -> Option<DocId> {
        self.doc_id
    }

    fn set_doc_id(&mut self, doc_id: DocId) {
        self.doc_id = Some(doc_id);
    }
}

impl TableRow for AbstractRecord {
    fn doc_id(&self) -> Option<DocId> {
        self.doc_id
    }

    fn set_doc_id(&mut self, doc_id: DocId) {
        self.doc_id = Some(doc_id);
    }
}

/// Read-only table keyed by `doc_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<R> {
    rows: BTreeMap<DocId, R>,
}

/// The citation metadata table.
pub type CitationTable = Table<CitationRecord>;

/// The title/abstract metadata table.
pub type AbstractTable = Table<AbstractRecord>;

impl<R: TableRow> Table<R> {
    /// Build a table from rows in source order.
    ///
    /// Rows without a `doc_id` get their zero-based position as key.
    ///
    /// # Errors
    /// Returns `ProviderError::ParseError` if two rows share a key
    pub fn from_rows(rows: impl IntoIterator<Item = R>) -> ProviderResult<Self> {
        let mut map = BTreeMap::new();
        for (position, mut row) in rows.into_iter().enumerate() {
            let doc_id = match row.doc_id() {
                Some(id) => id,
                None => {
                    let id = position as DocId;
                    row.set_doc_id(id);
                    id
                }
            };
            if map.insert(doc_id, row).is_some() {
                return Err(ProviderError::ParseError(format!("Duplicate doc_id {}", doc_id)));
            }
        }
        Ok(Self { rows: map })
    }
}

impl<R> Table<R> {
    pub fn get(&self, doc_id: DocId) -> Option<&R> {
        self.rows.get(&doc_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in ascending `doc_id` order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, &R)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self { rows: BTreeMap::new() }
    }
}

/// Source of the two metadata tables.
#[async_trait]
pub trait TableProvider: Send + Sync {
    async fn load_citations(&self) -> ProviderResult<CitationTable>;

    async fn load_abstracts(&self) -> ProviderResult<AbstractTable>;

    /// Human-readable description, used in logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(doc_id: Option<DocId>, arxiv_id: &str) -> CitationRecord {
        CitationRecord {
            doc_id,
            arxiv_id: arxiv_id.to_string(),
            txt_ref: format!("ref {}", arxiv_id),
            reasons: String::new(),
        }
    }

    #[test]
    fn test_positional_keys_assigned() {
        let table = Table::from_rows(vec![citation(None, "a"), citation(None, "b")]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().arxiv_id, "b");
        assert_eq!(table.get(1).unwrap().doc_id, Some(1));
    }

    #[test]
    fn test_explicit_keys_respected() {
        let table =
            Table::from_rows(vec![citation(Some(10), "a"), citation(Some(4), "b")]).unwrap();
        assert_eq!(table.get(10).unwrap().arxiv_id, "a");
        assert!(table.get(0).is_none());

        let order: Vec<DocId> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![4, 10]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let result = Table::from_rows(vec![citation(Some(1), "a"), citation(Some(1), "b")]);
        assert!(matches!(result, Err(ProviderError::ParseError(_))));
    }

    #[test]
    fn test_empty_table() {
        let table: CitationTable = Table::default();
        assert!(table.is_empty());
        assert!(table.get(0).is_none());
    }
}
