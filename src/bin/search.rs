//! Search binary entry point.
//!
//! Runs a query against the citation-reason index and the abstract index
//! and prints the top results of each side.
//!
//! # Examples
//!
//! Single query:
//! ```bash
//! search --index-dir data/index --query "fast radio burst gravitational lensing"
//! ```
//!
//! Stricter citation cutoff, JSON output:
//! ```bash
//! search --query "FRBs as cosmological distance measures" --percentile 99.8 --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use anyhow::{Context, Result};
use citation_search::{
    embedding::DynamicEmbeddingProvider,
    models::{EmbeddingConfig, IndexKind, RelevanceLevel},
    provider::{csv::CsvTableProvider, TableProvider},
    query::VectorIndexRetriever,
    ranking::ScoreSummary,
    search::{truncate_chars, CitationSearch, SearchOutcome, SearchSettings, PERCENTILE_RANGE},
    storage::{index_path, sqlite::SqliteStorage, IndexStorage},
    API_KEY_ENV,
};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type IndexRetriever = VectorIndexRetriever<DynamicEmbeddingProvider, SqliteStorage>;
type Engine = CitationSearch<IndexRetriever, IndexRetriever>;

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Two tables, citation side then abstract side
    Table,
    /// Machine-readable JSON
    Json,
}

/// Search papers by the reasons they were cited and by their abstracts
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Find papers to cite for a claim",
    long_about = "Match a query against the reasons other papers cited each paper, and against \
                  paper titles and abstracts.

The citation side keeps reasons scoring at or above a percentile of all reason scores for \
the query, groups them by paper, and ranks papers by how many reasons matched. The abstract \
side keeps papers scoring at least 0.8.

EXAMPLES:
  Single query:
    search --query \"fast radio burst gravitational lensing\"

  Stricter citation cutoff:
    search --query \"circumgalactic medium (cgm)\" --percentile 99.8

  Interactive mode:
    search --interactive"
)]
struct Args {
    /// Directory holding citation.db and abstract.db
    #[arg(long, value_name = "DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// Citation table CSV
    #[arg(long, value_name = "FILE", default_value = "data/citations.csv")]
    citations: PathBuf,

    /// Abstract table CSV
    #[arg(long, value_name = "FILE", default_value = "data/abstracts.csv")]
    abstracts: PathBuf,

    /// Search query (omit in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Citation score percentile cutoff, between 99.0 and 99.8
    #[arg(
        long,
        value_name = "P",
        default_value_t = SearchSettings::default().citation_percentile,
        value_parser = parse_percentile
    )]
    percentile: f64,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    /// FastEmbed model cache directory (only for locally embedded indexes)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

fn parse_percentile(value: &str) -> std::result::Result<f64, String> {
    let p: f64 = value.parse().map_err(|_| format!("'{}' is not a number", value))?;
    if PERCENTILE_RANGE.contains(&p) {
        Ok(p)
    } else {
        Err(format!(
            "percentile must be between {} and {}",
            PERCENTILE_RANGE.start(),
            PERCENTILE_RANGE.end()
        ))
    }
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Open one index store and read its embedding configuration.
async fn open_index(
    index_dir: &Path,
    kind: IndexKind,
) -> Result<(SqliteStorage, EmbeddingConfig)> {
    let path = index_path(index_dir, kind);
    if !path.exists() {
        anyhow::bail!(
            "Index store not found: {}\n\
             Build it first with the ingestion binary.",
            path.display()
        );
    }

    let mut storage = SqliteStorage::new(&path);
    storage
        .initialize()
        .await
        .with_context(|| format!("Failed to open {} index", kind))?;

    let config = storage
        .get_config()
        .await
        .with_context(|| format!("Failed to read {} index configuration", kind))?
        .ok_or_else(|| anyhow::anyhow!("The {} index has no embedding configuration", kind))?;

    let count = storage.count_nodes().await?;
    info!(
        "{} index: {} nodes, model {} ({} dims)",
        kind, count, config.model_name, config.dimension
    );
    if count == 0 {
        warn!("The {} index is empty", kind);
    }

    Ok((storage, config))
}

/// Model name recorded in an index store, or `None` when the store or its
/// configuration is absent.
async fn stored_model(index_dir: &Path, kind: IndexKind) -> Result<Option<String>> {
    let path = index_path(index_dir, kind);
    if !path.exists() {
        return Ok(None);
    }

    let mut storage = SqliteStorage::new(&path);
    storage
        .initialize()
        .await
        .with_context(|| format!("Failed to open {} index", kind))?;
    let config = storage
        .get_config()
        .await
        .with_context(|| format!("Failed to read {} index configuration", kind))?;
    Ok(config.map(|c| c.model_name))
}

/// A usable API key: set and not blank.
fn api_key_from(value: Option<String>) -> Option<String> {
    value.filter(|k| !k.trim().is_empty())
}

/// Whether a one-shot run has nothing to search for.
fn is_blank_query(query: Option<&str>, interactive: bool) -> bool {
    !interactive && query.map_or(true, |q| q.trim().is_empty())
}

/// Whether querying these stores needs an API key.
///
/// A store with no recorded model (`None`) counts as needing one.
fn needs_api_key(stored_models: &[Option<String>]) -> bool {
    stored_models
        .iter()
        .any(|m| m.as_deref().map_or(true, DynamicEmbeddingProvider::requires_api_key))
}

fn build_retriever(
    storage: SqliteStorage,
    config: &EmbeddingConfig,
    api_key: Option<&str>,
    cache_dir: Option<PathBuf>,
) -> Result<IndexRetriever> {
    let provider = DynamicEmbeddingProvider::for_config(config, api_key, cache_dir).with_context(
        || format!("Failed to create embedding provider for {}", config.model_name),
    )?;
    Ok(VectorIndexRetriever::new(provider, storage, None))
}

fn citation_table(outcome: Option<&SearchOutcome>, settings: &SearchSettings) -> String {
    let rows = outcome.map(|o| o.citations.as_slice()).unwrap_or_default();
    if rows.is_empty() {
        return "No results.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Reference").add_attribute(Attribute::Bold),
        Cell::new("arXiv").add_attribute(Attribute::Bold),
        Cell::new("Matches").add_attribute(Attribute::Bold),
        Cell::new("Reasons people cited it").add_attribute(Attribute::Bold),
    ]);

    for (idx, row) in rows.iter().take(settings.display_limit).enumerate() {
        let reasons = truncate_chars(&row.hit.reasons, settings.reasons_char_limit);
        let reasons = citation_search::search::split_reasons(&reasons).join("\n");
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(&row.record.txt_ref),
            Cell::new(&row.record.arxiv_id),
            Cell::new(row.hit.count),
            Cell::new(reasons),
        ]);
    }
    table.to_string()
}

fn abstract_table(outcome: Option<&SearchOutcome>, settings: &SearchSettings) -> String {
    let rows = outcome.map(|o| o.abstracts.as_slice()).unwrap_or_default();
    if rows.is_empty() {
        return "No results.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("arXiv").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Abstract").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, row) in rows.iter().take(settings.display_limit).enumerate() {
        let color = match row.relevance {
            RelevanceLevel::Identical => Color::Green,
            RelevanceLevel::HighlySimilar => Color::Cyan,
            RelevanceLevel::Similar => Color::Yellow,
            RelevanceLevel::Relevant => Color::White,
        };
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(&row.record.authors),
            Cell::new(&row.record.arxiv_id),
            Cell::new(&row.record.title),
            Cell::new(truncate_chars(&row.record.abstract_text, settings.abstract_char_limit)),
            Cell::new(format!("{:.4}", row.score)).fg(color),
        ]);
    }
    table.to_string()
}

/// JSON view of one query: the displayed rows of each side.
#[derive(Serialize)]
struct JsonReport<'a> {
    query: &'a str,
    percentile: f64,
    citations: &'a [citation_search::search::CitationMatch],
    abstracts: &'a [citation_search::search::AbstractMatch],
    citation_scores: Option<ScoreSummary>,
}

fn render(
    query: &str,
    percentile: f64,
    outcome: Option<&SearchOutcome>,
    settings: &SearchSettings,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("Results: from embedding reasons for citation");
            println!("{}", citation_table(outcome, settings));
            println!("\nResults: from embedding title and abstracts");
            println!("{}", abstract_table(outcome, settings));
        }
        OutputFormat::Json => {
            let limit = settings.display_limit;
            let citations = outcome
                .map(|o| &o.citations[..o.citations.len().min(limit)])
                .unwrap_or_default();
            let abstracts = outcome
                .map(|o| &o.abstracts[..o.abstracts.len().min(limit)])
                .unwrap_or_default();
            let report = JsonReport {
                query,
                percentile,
                citations,
                abstracts,
                citation_scores: outcome.and_then(|o| o.citation_scores),
            };
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize results to JSON")?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn print_scores(summary: Option<&ScoreSummary>) {
    match summary {
        Some(s) => println!(
            "Citation scores: {} reasons, min {:.4}, max {:.4}, cutoff {:.4}",
            s.count, s.min, s.max, s.cutoff
        ),
        None => println!("No citation scores yet."),
    }
}

fn print_detail(outcome: &SearchOutcome, side: &str, rank: usize) {
    println!("\n{}", "═".repeat(80));
    match side {
        "c" => match outcome.citations.get(rank - 1) {
            Some(row) => {
                println!("{}: {} (arXiv id: {})", rank, row.record.txt_ref, row.record.arxiv_id);
                println!(
                    "Matched reasons: {}  best score: {:.4}",
                    row.hit.count, row.hit.best_score
                );
                println!("\nReasons that people cited it:");
                for reason in row.reasons() {
                    println!("  - {}", reason);
                }
            }
            None => println!("No citation result at rank {}", rank),
        },
        _ => match outcome.abstracts.get(rank - 1) {
            Some(row) => {
                println!("{}: {} (arXiv id: {})", rank, row.record.authors, row.record.arxiv_id);
                println!("Title: {}", row.record.title);
                println!("Relevance: {:?}  score: {:.4}", row.relevance, row.score);
                println!("\nAbstract:\n{}", row.record.abstract_text);
            }
            None => println!("No abstract result at rank {}", rank),
        },
    }
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <query>           - Search for papers");
    println!(
        "  /threshold P      - Set citation percentile ({} to {})",
        PERCENTILE_RANGE.start(),
        PERCENTILE_RANGE.end()
    );
    println!("  /format table     - Use table output format");
    println!("  /format json      - Use JSON output format");
    println!("  /detail c N       - Full reasons for citation result N");
    println!("  /detail a N       - Full abstract for abstract result N");
    println!("  /scores           - Citation score distribution of the last query");
    println!("  /help             - Show this help");
    println!("  Ctrl+D or Ctrl+C  - Exit");
}

async fn run_query(
    engine: &Engine,
    query: &str,
    percentile: f64,
    format: OutputFormat,
) -> Result<Option<SearchOutcome>> {
    let start = Instant::now();
    let outcome = engine
        .search(query, percentile)
        .await
        .with_context(|| format!("Search failed for query: '{}'", query))?;
    debug!("Search took {:.2}s", start.elapsed().as_secs_f64());

    render(query, percentile, outcome.as_ref(), engine.settings(), format)?;
    Ok(outcome)
}

async fn run_interactive(
    engine: Engine,
    mut percentile: f64,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Citation Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last: Option<SearchOutcome> = None;

    loop {
        match rl.readline("Search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                if !line.starts_with('/') {
                    match run_query(&engine, line, percentile, format).await {
                        Ok(outcome) => last = outcome,
                        Err(e) => eprintln!("{:#}", e),
                    }
                    continue;
                }

                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts[0] {
                    "/help" => print_help(),
                    "/threshold" => match parts.get(1).map(|p| parse_percentile(p)) {
                        Some(Ok(p)) => {
                            percentile = p;
                            println!("Citation percentile set to {}", percentile);
                        }
                        Some(Err(e)) => eprintln!("{}", e),
                        None => println!("Citation percentile is {}", percentile),
                    },
                    "/format" => match parts.get(1).copied() {
                        Some("table") => format = OutputFormat::Table,
                        Some("json") => format = OutputFormat::Json,
                        _ => eprintln!("Usage: /format [table|json]"),
                    },
                    "/scores" => {
                        print_scores(last.as_ref().and_then(|o| o.citation_scores.as_ref()))
                    }
                    "/detail" => {
                        let side = parts.get(1).copied();
                        let rank = parts.get(2).and_then(|n| n.parse::<usize>().ok());
                        match (side, rank, last.as_ref()) {
                            (Some(side @ ("c" | "a")), Some(rank), Some(outcome)) if rank > 0 => {
                                print_detail(outcome, side, rank)
                            }
                            (_, _, None) => eprintln!("Run a search first"),
                            _ => eprintln!("Usage: /detail [c|a] N"),
                        }
                    }
                    other => eprintln!(
                        "Unknown command: {}. Type /help for available commands.",
                        other
                    ),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let settings = SearchSettings::default();

    if is_blank_query(args.query.as_deref(), args.interactive) {
        info!("No query given; use --query or --interactive");
        return render("", args.percentile, None, &settings, args.format);
    }

    let api_key = api_key_from(std::env::var(API_KEY_ENV).ok());
    if api_key.is_none() {
        let stored_models = vec![
            stored_model(&args.index_dir, IndexKind::Citation).await?,
            stored_model(&args.index_dir, IndexKind::Abstract).await?,
        ];
        if needs_api_key(&stored_models) {
            warn!("{} is not set; no retrieval attempted", API_KEY_ENV);
            let query = args.query.as_deref().unwrap_or_default();
            return render(query, args.percentile, None, &settings, args.format);
        }
    }

    let (citation_store, citation_config) =
        open_index(&args.index_dir, IndexKind::Citation).await?;
    let (abstract_store, abstract_config) =
        open_index(&args.index_dir, IndexKind::Abstract).await?;

    let tables = CsvTableProvider::new(&args.citations, &args.abstracts);
    info!("Loading tables from {}", tables.name());
    let citations = tables
        .load_citations()
        .await
        .context("Failed to load citation table")?;
    let abstracts = tables
        .load_abstracts()
        .await
        .context("Failed to load abstract table")?;

    let key = api_key.as_deref();
    let citation_retriever =
        build_retriever(citation_store, &citation_config, key, args.cache_dir.clone())?;
    let abstract_retriever =
        build_retriever(abstract_store, &abstract_config, key, args.cache_dir.clone())?;

    let engine = CitationSearch::new(
        citations,
        abstracts,
        citation_retriever,
        abstract_retriever,
        settings,
    );

    match args.query {
        Some(query) if !args.interactive => {
            run_query(&engine, &query, args.percentile, args.format).await?;
        }
        _ => run_interactive(engine, args.percentile, args.format).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SearchSettings {
        SearchSettings::default()
    }

    #[test]
    fn test_blank_query_detection() {
        assert!(is_blank_query(None, false));
        assert!(is_blank_query(Some("   "), false));
        assert!(!is_blank_query(Some("fast radio burst"), false));
        assert!(!is_blank_query(None, true));
    }

    #[test]
    fn test_api_key_from_rejects_blank() {
        assert_eq!(api_key_from(None), None);
        assert_eq!(api_key_from(Some(" \t".to_string())), None);
        assert_eq!(api_key_from(Some("sk-test".to_string())), Some("sk-test".to_string()));
    }

    #[test]
    fn test_needs_api_key() {
        let openai = Some("text-embedding-3-small".to_string());
        let local = Some("BGESmallENV15".to_string());

        assert!(needs_api_key(&[openai.clone(), local.clone()]));
        assert!(!needs_api_key(&[local.clone(), local.clone()]));
        assert!(needs_api_key(&[local, None]));
    }

    #[tokio::test]
    async fn test_stored_model_without_store_is_none() {
        let dir = tempfile::tempdir().unwrap();

        let model = stored_model(dir.path(), IndexKind::Citation).await.unwrap();
        assert_eq!(model, None);
        assert!(needs_api_key(&[model]));
        assert!(!index_path(dir.path(), IndexKind::Citation).exists());
    }

    #[tokio::test]
    async fn test_stored_model_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SqliteStorage::new(index_path(dir.path(), IndexKind::Abstract));
        storage.initialize().await.unwrap();
        storage
            .store_config(&EmbeddingConfig {
                model_name: "BGESmallENV15".to_string(),
                dimension: 384,
            })
            .await
            .unwrap();

        let model = stored_model(dir.path(), IndexKind::Abstract).await.unwrap();
        assert_eq!(model.as_deref(), Some("BGESmallENV15"));
        assert!(!needs_api_key(&[model]));
    }

    #[test]
    fn test_skipped_search_renders_empty_panes() {
        assert_eq!(citation_table(None, &settings()), "No results.");
        assert_eq!(abstract_table(None, &settings()), "No results.");
        assert!(render("", 99.7, None, &settings(), OutputFormat::Table).is_ok());
        assert!(render("frb", 99.7, None, &settings(), OutputFormat::Json).is_ok());
    }

    #[test]
    fn test_parse_percentile_range() {
        assert_eq!(parse_percentile("99.7"), Ok(99.7));
        assert!(parse_percentile("98").is_err());
        assert!(parse_percentile("abc").is_err());
    }
}
