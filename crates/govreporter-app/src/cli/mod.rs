//! Command-line interface definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "govreporter",
    version,
    about = "Indexes US federal legal documents into a vector store and serves them to LLMs over MCP"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Log level (error, warn, info, debug, trace).
    #[arg(global = true, long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the MCP server on stdio.
    Server,
    /// Ingest documents from an upstream source.
    Ingest(IngestArgs),
    /// Remove a vector-store collection.
    Delete(DeleteArgs),
    /// Inspect the vector store.
    Info(InfoArgs),
    /// One-shot semantic search for debugging.
    Query(QueryArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(subcommand)]
    pub source: IngestSource,
}

#[derive(Debug, Subcommand)]
pub enum IngestSource {
    /// Supreme Court opinions from CourtListener.
    Opinions(IngestRunArgs),
    /// Executive Orders from the Federal Register.
    Orders(IngestRunArgs),
}

#[derive(Debug, Args)]
pub struct IngestRunArgs {
    /// Start of the publication-date range (YYYY-MM-DD).
    #[arg(long = "start-date", value_parser = parse_date)]
    pub start_date: NaiveDate,
    /// End of the publication-date range (YYYY-MM-DD).
    #[arg(long = "end-date", value_parser = parse_date)]
    pub end_date: NaiveDate,
    /// Documents per embedding/upsert batch.
    #[arg(long = "batch-size", default_value_t = crate::pipeline::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Concurrent pipeline workers.
    #[arg(long = "workers", default_value_t = crate::pipeline::DEFAULT_WORKERS)]
    pub workers: usize,
    /// Process documents without writing to the vector store.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Progress database path (defaults to `<type>_ingestion.db`).
    #[arg(long = "progress-db")]
    pub progress_db: Option<PathBuf>,
    /// Vector store endpoint override.
    #[arg(long = "vector-db-path")]
    pub vector_db_path: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Collection to delete.
    #[arg(long = "collection", conflicts_with = "all")]
    pub collection: Option<String>,
    /// Delete every collection.
    #[arg(long = "all")]
    pub all: bool,
    /// Skip the confirmation prompt.
    #[arg(short = 'y')]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    #[command(subcommand)]
    pub what: InfoCommands,
}

#[derive(Debug, Subcommand)]
pub enum InfoCommands {
    /// List collections and their chunk counts.
    Collections,
    /// Show sample chunks from a collection.
    Sample(SampleArgs),
}

#[derive(Debug, Args)]
pub struct SampleArgs {
    /// Document type to sample.
    #[arg(value_enum)]
    pub doc_type: DocTypeArg,
    /// Number of chunks to show.
    #[arg(long = "limit", default_value_t = 5)]
    pub limit: usize,
    /// Include the chunk text in the output.
    #[arg(long = "show-text")]
    pub show_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocTypeArg {
    Opinions,
    Orders,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Query text.
    pub text: String,
    /// Maximum hits to return.
    #[arg(long = "limit", default_value_t = 10)]
    pub limit: usize,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("`{raw}` is not a valid YYYY-MM-DD date"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_subcommand_parses() {
        let cli = Cli::try_parse_from([
            "govreporter",
            "ingest",
            "opinions",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-01-31",
            "--batch-size",
            "25",
            "--dry-run",
        ])
        .expect("parse");
        let Commands::Ingest(args) = cli.command else {
            panic!("wrong command");
        };
        let IngestSource::Opinions(run) = args.source else {
            panic!("wrong source");
        };
        assert_eq!(run.batch_size, 25);
        assert!(run.dry_run);
        assert_eq!(run.start_date.to_string(), "2024-01-01");
    }

    #[test]
    fn invalid_date_is_rejected() {
        let result = Cli::try_parse_from([
            "govreporter",
            "ingest",
            "orders",
            "--start-date",
            "Jan 1 2024",
            "--end-date",
            "2024-01-31",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn delete_rejects_collection_with_all() {
        let result = Cli::try_parse_from([
            "govreporter",
            "delete",
            "--collection",
            "court_opinions",
            "--all",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn query_and_info_parse() {
        let cli = Cli::try_parse_from(["govreporter", "query", "appropriations", "--limit", "3"])
            .expect("parse");
        assert!(matches!(cli.command, Commands::Query(_)));

        let cli = Cli::try_parse_from(["govreporter", "info", "sample", "opinions", "--show-text"])
            .expect("parse");
        let Commands::Info(info) = cli.command else {
            panic!("wrong command");
        };
        assert!(matches!(info.what, InfoCommands::Sample(_)));
    }
}
