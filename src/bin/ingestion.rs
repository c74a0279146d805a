//! Index builder binary entry point.
//!
//! Reads the citation and abstract tables, embeds one node per citation
//! reason and one node per paper abstract, and writes the two index stores.
//!
//! # Examples
//!
//! Build both indexes from scratch with OpenAI embeddings:
//! ```bash
//! OPENAI_API_KEY=sk-... ingestion --mode init-new --embedding-provider open-ai
//! ```
//!
//! Add new rows to an existing citation index:
//! ```bash
//! ingestion --citations data/citations.csv --index citation
//! ```

use anyhow::{Context, Result};
use citation_search::{
    embedding::{
        fastembed::{model_from_name, FastEmbedProvider},
        openai::OpenAIEmbedding,
        DynamicEmbeddingProvider, EmbeddingProvider,
    },
    ingestion::{nodes_for, IndexBuilder, IngestionStats, DEFAULT_BATCH_SIZE},
    models::IndexKind,
    provider::{csv::CsvTableProvider, AbstractTable, CitationTable, TableProvider},
    storage::{index_path, sqlite::SqliteStorage},
    API_KEY_ENV,
};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Operation mode for the index builder
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Open existing stores and validate their embedding config (default)
    Connect,
    /// Create the stores with a fresh schema
    InitNew,
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbeddingProviderType {
    /// FastEmbed local embedding provider (default, no API required)
    FastEmbed,
    /// OpenAI embeddings (requires OPENAI_API_KEY)
    OpenAI,
}

/// Which index stores to build
#[derive(Debug, Clone, Copy, ValueEnum)]
enum IndexSelection {
    Citation,
    Abstract,
    Both,
}

impl IndexSelection {
    fn kinds(self) -> &'static [IndexKind] {
        match self {
            IndexSelection::Citation => &[IndexKind::Citation],
            IndexSelection::Abstract => &[IndexKind::Abstract],
            IndexSelection::Both => &[IndexKind::Citation, IndexKind::Abstract],
        }
    }
}

/// Build the citation-reason and abstract indexes
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Build the citation search indexes",
    long_about = "Embed citation reasons and paper abstracts and store them in SQLite index files.

Each reason in a citation row (separated by ';') becomes one node of citation.db. Each \
abstract row becomes one node of abstract.db holding its title and abstract.

EXAMPLES:
  Create both indexes:
    ingestion --mode init-new

  Use OpenAI embeddings:
    OPENAI_API_KEY=sk-... ingestion --mode init-new --embedding-provider open-ai

  Only refresh the abstract index, smaller batches:
    ingestion --index abstract --batch-size 20 --log-level debug"
)]
struct IngestionArgs {
    /// Citation table CSV
    #[arg(long, value_name = "FILE", default_value = "data/citations.csv")]
    citations: PathBuf,

    /// Abstract table CSV
    #[arg(long, value_name = "FILE", default_value = "data/abstracts.csv")]
    abstracts: PathBuf,

    /// Directory receiving citation.db and abstract.db
    #[arg(long, value_name = "DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// Which index to build
    #[arg(long, value_enum, default_value = "both")]
    index: IndexSelection,

    /// Operation mode: connect to existing stores or initialize new ones
    #[arg(long, value_enum, default_value = "connect")]
    mode: Mode,

    /// Embedding provider to use
    #[arg(long, value_enum, default_value = "fast-embed")]
    embedding_provider: EmbeddingProviderType,

    /// Embedding model name (provider-dependent, optional)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Number of nodes per embedding batch
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn create_embedding_provider(args: &IngestionArgs) -> Result<DynamicEmbeddingProvider> {
    let provider = match args.embedding_provider {
        EmbeddingProviderType::FastEmbed => {
            let model = match &args.embedding_model {
                Some(name) => Some(
                    model_from_name(name)
                        .with_context(|| format!("Unknown FastEmbed model: {}", name))?,
                ),
                None => None,
            };

            let cache_dir = args.cache_dir.clone().unwrap_or_else(|| {
                dirs::cache_dir()
                    .map(|p| p.join("fastembed"))
                    .unwrap_or_else(|| PathBuf::from(".cache/fastembed"))
            });
            debug!("FastEmbed cache directory: {}", cache_dir.display());

            let provider = FastEmbedProvider::new(model, Some(cache_dir))
                .context("Failed to initialize FastEmbed provider")?;
            DynamicEmbeddingProvider::FastEmbed(provider)
        }
        EmbeddingProviderType::OpenAI => {
            let api_key = std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .with_context(|| {
                    format!("{} must be set when using the OpenAI provider", API_KEY_ENV)
                })?;
            let model = args.embedding_model.clone();
            DynamicEmbeddingProvider::OpenAI(OpenAIEmbedding::new(api_key, model))
        }
    };

    info!(
        "Embedding provider ready: model={}, dimension={}",
        provider.model_name(),
        provider.dimension()
    );
    Ok(provider)
}

fn create_storage(index_dir: &Path, kind: IndexKind) -> Result<SqliteStorage> {
    if !index_dir.exists() {
        std::fs::create_dir_all(index_dir)
            .with_context(|| format!("Failed to create index directory: {}", index_dir.display()))?;
        info!("Created index directory: {}", index_dir.display());
    }
    let path = index_path(index_dir, kind);
    debug!("{} index store: {}", kind, path.display());
    Ok(SqliteStorage::new(path))
}

async fn create_builder(
    mode: Mode,
    provider: DynamicEmbeddingProvider,
    storage: SqliteStorage,
    batch_size: usize,
) -> Result<IndexBuilder<DynamicEmbeddingProvider, SqliteStorage>> {
    let builder = match mode {
        Mode::Connect => IndexBuilder::connect(provider, storage, Some(batch_size))
            .await
            .context("Failed to open index store. Use --mode init-new to create it.")?,
        Mode::InitNew => IndexBuilder::initialize_new(provider, storage, Some(batch_size))
            .await
            .context("Failed to initialize index store")?,
    };
    Ok(builder)
}

fn create_progress_bar(total: usize, kind: IndexKind) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {pos}/{len} nodes | Inserted: {msg}",
            )
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    pb.set_prefix(kind.to_string());
    pb.set_message("0");
    Ok(pb)
}

async fn build_index(
    args: &IngestionArgs,
    kind: IndexKind,
    provider: DynamicEmbeddingProvider,
    citations: &CitationTable,
    abstracts: &AbstractTable,
) -> Result<IngestionStats> {
    let nodes = nodes_for(kind, citations, abstracts);
    info!("{} index: {} nodes to process", kind, nodes.len());
    if nodes.is_empty() {
        warn!("No {} nodes to ingest", kind);
    }

    let storage = create_storage(&args.index_dir, kind)?;
    let mut builder = create_builder(args.mode, provider, storage, args.batch_size).await?;

    let progress = create_progress_bar(nodes.len(), kind)?;
    let stats = builder
        .ingest_nodes_with_progress(&nodes, |running| {
            progress.set_position(running.total_processed as u64);
            progress.set_message(running.inserted.to_string());
        })
        .await
        .with_context(|| format!("Failed to ingest {} nodes", kind))?;
    progress.finish_with_message(stats.inserted.to_string());

    Ok(stats)
}

fn print_stats(kind: IndexKind, stats: &IngestionStats) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║ {:<38} ║", format!("{} index", kind));
    println!("╠════════════════════════════════════════╣");
    println!("║ Total processed:      {:>16} ║", stats.total_processed);
    println!("║ Inserted:             {:>16} ║", stats.inserted);
    println!("║ Duplicates skipped:   {:>16} ║", stats.duplicates_skipped);
    println!("║ Failed:               {:>16} ║", stats.failed);
    println!("╚════════════════════════════════════════╝");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();
    init_logging(&args.log_level);
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    let tables = CsvTableProvider::new(&args.citations, &args.abstracts);
    let kinds = args.index.kinds();

    let citations = if kinds.contains(&IndexKind::Citation) {
        tables.load_citations().await.context("Failed to load citation table")?
    } else {
        CitationTable::default()
    };
    let abstracts = if kinds.contains(&IndexKind::Abstract) {
        tables.load_abstracts().await.context("Failed to load abstract table")?
    } else {
        AbstractTable::default()
    };
    info!(
        "Loaded {} citation rows and {} abstract rows from {}",
        citations.len(),
        abstracts.len(),
        tables.name()
    );

    let provider = create_embedding_provider(&args)?;

    let mut total = IngestionStats::new();
    for &kind in kinds {
        let stats = build_index(&args, kind, provider.clone(), &citations, &abstracts).await?;
        print_stats(kind, &stats);
        total.merge(&stats);
    }

    println!("\nElapsed time: {:.2?}", start_time.elapsed());

    if total.failed > 0 {
        warn!("{} nodes failed to store - check logs for details", total.failed);
    }
    info!("Index build completed");

    Ok(())
}
