//! CSV table provider.
//!
//! Expected columns:
//! - citations: `arxiv_id`, `txt_ref`, `reasons`, optional `doc_id`
//! - abstracts: `arxiv_id`, `authors`, `title`, `abstract`, optional `doc_id`
//!
//! Extra columns are ignored.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{
    AbstractTable, CitationTable, ProviderError, ProviderResult, Table, TableProvider, TableRow,
};

/// Loads the citation and abstract tables from two CSV files.
#[derive(Debug, Clone)]
pub struct CsvTableProvider {
    citations_path: PathBuf,
    abstracts_path: PathBuf,
    description: String,
}

impl CsvTableProvider {
    pub fn new(citations_path: impl Into<PathBuf>, abstracts_path: impl Into<PathBuf>) -> Self {
        let citations_path = citations_path.into();
        let abstracts_path = abstracts_path.into();
        let description = format!(
            "CSV tables ({}, {})",
            citations_path.display(),
            abstracts_path.display()
        );
        Self {
            citations_path,
            abstracts_path,
            description,
        }
    }
}

/// Parse CSV bytes into a keyed table.
pub fn parse_table<R>(bytes: &[u8]) -> ProviderResult<Table<R>>
where
    R: DeserializeOwned + TableRow,
{
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::Headers)
        .from_reader(bytes);

    let rows = reader
        .deserialize::<R>()
        .enumerate()
        .map(|(i, row)| row.map_err(|e| ProviderError::ParseError(format!("row {}: {}", i + 1, e))))
        .collect::<ProviderResult<Vec<R>>>()?;

    Table::from_rows(rows)
}

async fn load_table<R>(path: &Path) -> ProviderResult<Table<R>>
where
    R: DeserializeOwned + TableRow,
{
    let bytes = tokio::fs::read(path).await?;
    let table = parse_table(&bytes)
        .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} rows from {}", table.len(), path.display());
    Ok(table)
}

#[async_trait]
impl TableProvider for CsvTableProvider {
    async fn load_citations(&self) -> ProviderResult<CitationTable> {
        load_table(&self.citations_path).await
    }

    async fn load_abstracts(&self) -> ProviderResult<AbstractTable> {
        load_table(&self.abstracts_path).await
    }

    fn name(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AbstractRecord, CitationRecord};

    #[test]
    fn test_parse_citations_without_doc_id() {
        let csv = "arxiv_id,txt_ref,reasons\n\
                   0706.3023,Lorimer et al. 2007,first FRB discovery;background on FRBs\n\
                   1603.08880,Spitler et al. 2016,first repeating FRB\n";
        let table: CitationTable = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        let lorimer: &CitationRecord = table.get(0).unwrap();
        assert_eq!(lorimer.txt_ref, "Lorimer et al. 2007");
        assert_eq!(lorimer.reasons, "first FRB discovery;background on FRBs");
        assert_eq!(table.get(1).unwrap().arxiv_id, "1603.08880");
    }

    #[test]
    fn test_parse_abstracts_with_doc_id_and_extra_columns() {
        let csv = "doc_id,arxiv_id,authors,title,abstract,year\n\
                   5,2301.00001,\"Doe, J.; Roe, R.\",FRB lensing,\"We search for lensed bursts.\",2023\n";
        let table: AbstractTable = parse_table(csv.as_bytes()).unwrap();

        let record: &AbstractRecord = table.get(5).unwrap();
        assert_eq!(record.authors, "Doe, J.; Roe, R.");
        assert_eq!(record.abstract_text, "We search for lensed bursts.");
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let csv = "arxiv_id,reasons\n0706.3023,background\n";
        let result: ProviderResult<CitationTable> = parse_table(csv.as_bytes());
        assert!(matches!(result, Err(ProviderError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_provider_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let citations = dir.path().join("citations.csv");
        let abstracts = dir.path().join("abstracts.csv");
        std::fs::write(&citations, "arxiv_id,txt_ref,reasons\n1,Ref A,reason a\n").unwrap();
        std::fs::write(&abstracts, "arxiv_id,authors,title,abstract\n1,A,T,Abs\n").unwrap();

        let provider = CsvTableProvider::new(&citations, &abstracts);
        assert_eq!(provider.load_citations().await.unwrap().len(), 1);
        assert_eq!(provider.load_abstracts().await.unwrap().get(0).unwrap().title, "T");
        assert!(provider.name().contains("citations.csv"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let provider = CsvTableProvider::new("/nonexistent/c.csv", "/nonexistent/a.csv");
        assert!(matches!(provider.load_citations().await, Err(ProviderError::IoError(_))));
    }
}
