//! # dho-index
//!
//! Ingests PDF documents into a semantic index and serves vector-similarity
//! search over them.
//!
//! ## Architecture
//!
//! ```text
//! PDF URLs → fetch → extract → chunk → embed → Postgres/pgvector → search HTTP service
//! ```
//!
//! ## Modules
//!
//! - [`config`] — environment-driven configuration, loaded once into a
//!   refreshable global snapshot
//! - [`models`] — core data types: `Book`, `TextChunk`, `EmbeddedChunk`, `SearchResult`
//! - [`chunk`] — sentence-splitter and word-overlap chunking strategies
//! - [`embedding`] — embedding provider trait, OpenAI/Ollama/dummy implementations
//! - [`extract`] — PDF text and metadata extraction
//! - [`storage`] — the `Storage` trait and its Postgres+pgvector implementation
//! - [`ingest`] — single-book ingestion pipeline
//! - [`orchestrator`] — bounded-concurrency batch runner
//! - [`search`] — the HTTP search service
//! - [`db`] / [`migrate`] — connection pooling and schema bootstrap
//! - [`progress`] — batch ingestion progress reporting
//! - [`error`] — the ingestion error taxonomy
//! - [`logging`] — structured logging init

mod chunk;
mod config;
mod db;
mod embedding;
mod error;
mod extract;
mod ingest;
mod logging;
mod migrate;
mod models;
mod orchestrator;
mod progress;
mod search;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::ingest::IngestDeps;
use crate::progress::ProgressMode;
use crate::storage::PgStorage;

#[derive(Parser)]
#[command(
    name = "dho-index",
    about = "Ingests PDF documents into a semantic index and serves vector-similarity search over them",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the database schema (books + the active provider's chunk table)
    Migrate,

    /// Start the search HTTP service
    Serve {
        /// Address to bind the HTTP listener to
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Ingest a batch of PDF URLs
    Ingest {
        /// Path to a file containing one PDF URL per line
        #[arg(long)]
        urls_file: PathBuf,

        /// Maximum books processed concurrently
        #[arg(long, default_value_t = orchestrator::DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Directory to write processing_status.json / failed_books.json into
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Emit JSON progress lines on stderr instead of human-readable ones
        #[arg(long)]
        json_progress: bool,

        /// Collection tag (`samling`) stamped onto every book this run creates
        #[arg(long, default_value = "default")]
        collection: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = config::get()?;
    logging::init(&cfg);

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let pool = db::connect(&cfg).await?;
            let provider = embedding::provider_from_config(&cfg)?;
            migrate::run_migrations(&pool, provider.as_ref()).await?;
            tracing::info!("database schema is up to date");
        }
        Commands::Serve { bind } => {
            let pool = db::connect(&cfg).await?;
            let provider = embedding::provider_from_config(&cfg)?;
            migrate::run_migrations(&pool, provider.as_ref()).await?;
            let storage: Arc<dyn storage::Storage> = Arc::new(PgStorage::new(pool));
            search::run_server(cfg.clone(), Arc::from(provider), storage, &bind).await?;
        }
        Commands::Ingest {
            urls_file,
            concurrency,
            output_dir,
            json_progress,
            collection,
        } => {
            let urls = read_urls(&urls_file)?;
            let pool = db::connect(&cfg).await?;
            let provider = embedding::provider_from_config(&cfg)?;
            migrate::run_migrations(&pool, provider.as_ref()).await?;
            let storage: Arc<dyn storage::Storage> = Arc::new(PgStorage::new(pool));

            let deps = Arc::new(IngestDeps {
                config: Arc::clone(&cfg),
                provider: Arc::from(provider),
                storage,
                client: reqwest::Client::new(),
                collection,
            });

            let mode = if json_progress { ProgressMode::Json } else { ProgressMode::default_for_tty() };
            let cancel = orchestrator::cancel_on_ctrl_c();
            let result =
                orchestrator::run_cancellable(deps, urls, concurrency, Some(Arc::from(mode.reporter())), cancel)
                    .await;

            std::fs::create_dir_all(&output_dir)?;
            orchestrator::write_processing_status(&output_dir, &cfg, &result)?;
            orchestrator::write_failed_books(&output_dir, &result)?;

            println!(
                "ingested {}/{} books ({} failed)",
                result.successful, result.total, result.failed
            );
        }
    }

    Ok(())
}

fn read_urls(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect())
}
