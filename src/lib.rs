//! Citation search - find papers to cite by searching why others cited them.
//!
//! Given a free-text claim, the library returns papers ranked two ways:
//! by similarity between the claim and the reasons other papers gave for
//! citing them, and by similarity between the claim and paper abstracts.
//!
//! # Architecture
//!
//! - **models**: table rows, retrieval candidates, grouped citation rows
//! - **embedding**: text embedding providers (OpenAI, FastEmbed)
//! - **storage**: persisted vector indexes (SQLite)
//! - **provider**: the citation and abstract metadata tables (CSV)
//! - **query**: retrievers that score index nodes against a query
//! - **ranking**: threshold, percentile and group-and-count filters
//! - **search**: the per-process search context tying it all together
//! - **ingestion**: builds the indexes from the tables
//!
//! # Workflow
//!
//! ## Offline
//!
//! 1. Load the citation and abstract tables
//! 2. Split citation reasons into one node each; join title and abstract
//! 3. Embed the nodes and store them in one SQLite index per side
//!
//! ## Per query
//!
//! 1. Embed the query and score every node of both indexes
//! 2. Abstract side: keep scores at or above 0.8
//! 3. Citation side: keep scores at or above the chosen percentile of this
//!    query's scores, group by paper, rank by number of surviving reasons
//! 4. Join rows to the tables by `doc_id` and show the top 5 per side
//!
//! # Example
//!
//! ```ignore
//! use citation_search::{
//!     embedding::openai::OpenAIEmbedding,
//!     models::IndexKind,
//!     provider::{csv::CsvTableProvider, TableProvider},
//!     query::VectorIndexRetriever,
//!     search::{CitationSearch, SearchSettings},
//!     storage::{index_path, sqlite::SqliteStorage, IndexStorage},
//! };
//!
//! let tables = CsvTableProvider::new("data/citations.csv", "data/abstracts.csv");
//! let mut citation_store = SqliteStorage::new(index_path(dir, IndexKind::Citation));
//! citation_store.initialize().await?;
//! // ... same for the abstract store
//!
//! let search = CitationSearch::new(
//!     tables.load_citations().await?,
//!     tables.load_abstracts().await?,
//!     VectorIndexRetriever::new(OpenAIEmbedding::new(key.clone(), None), citation_store, None),
//!     VectorIndexRetriever::new(OpenAIEmbedding::new(key, None), abstract_store, None),
//!     SearchSettings::default(),
//! );
//!
//! if let Some(outcome) = search.search("fast radio burst lensing", 99.7).await? {
//!     for row in outcome.citations.iter().take(5) {
//!         println!("{} ({} reasons)", row.record.txt_ref, row.hit.count);
//!     }
//! }
//! ```

pub mod embedding;
pub mod ingestion;
pub mod models;
pub mod provider;
pub mod query;
pub mod ranking;
pub mod search;
pub mod storage;

pub use embedding::EmbeddingProvider;
pub use models::{
    AbstractRecord, CitationHit, CitationRecord, DocId, EmbeddingConfig, RelevanceLevel,
    RetrievalCandidate,
};
pub use query::Retriever;
pub use ranking::{filter_citation_results, percentile, rearrange_query_results};
pub use search::{CitationSearch, SearchOutcome, SearchSettings};
pub use storage::IndexStorage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model name
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for text-embedding-3-small
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Environment variable holding the OpenAI API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
