//! # doc-indexer CLI (`docidx`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docidx index create` | Delete and recreate the search index |
//! | `docidx folders` | List the source's folders |
//! | `docidx ingest` | Chunk, embed, and upload documents |
//! | `docidx run` | Recreate the index, then ingest |
//! | `docidx chat` | Ask questions against the index |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what would be ingested
//! docidx ingest --dry-run --config ./config/docidx.toml
//!
//! # Ingest two folders with JSON progress on stderr
//! docidx ingest --folder /Policies --folder /HR --progress json
//!
//! # Verbose logs
//! RUST_LOG=doc_indexer=debug docidx run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doc_indexer::progress::ProgressMode;
use doc_indexer::store::azure::AzureSearchStore;
use doc_indexer::{chat, config, ingest, schema};

/// Builds and feeds a vector search index from a document library.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docidx.example.toml` for a full example. Credentials
/// come from `SEARCH_ADMIN_API_KEY`, `AOAI_KEY` (or `OPENAI_API_KEY`), and
/// `SP_CLIENT_SECRET`.
#[derive(Parser)]
#[command(
    name = "docidx",
    about = "Chunk, embed, and index a document library into Azure AI Search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the search index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// List the folders the configured source exposes.
    Folders,

    /// Ingest documents into the existing index.
    ///
    /// Folders default to `[source].folders`, or every folder the source
    /// lists when that is empty.
    Ingest {
        /// Folder to ingest. Repeatable.
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Fetch and chunk only; report counts without embedding or uploading.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` on a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Recreate the index, then ingest. Nothing is ingested if the index
    /// cannot be created.
    Run {
        /// Folder to ingest. Repeatable.
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Progress output on stderr: `human`, `json`, or `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Interactive question answering over the index. Type `q!` to quit.
    Chat,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Delete the index if it exists and create it from the configured schema.
    Create,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            action: IndexAction::Create,
        } => {
            let store = AzureSearchStore::from_config(&cfg)?;
            schema::run_index_create(&cfg, &store).await?;
        }
        Commands::Folders => {
            ingest::run_folders(&cfg).await?;
        }
        Commands::Ingest {
            folders,
            dry_run,
            progress,
        } => {
            let mode = ProgressMode::from_flag(progress.as_deref())?;
            ingest::run_ingest(&cfg, &folders, dry_run, mode).await?;
        }
        Commands::Run { folders, progress } => {
            let mode = ProgressMode::from_flag(progress.as_deref())?;
            ingest::run_full(&cfg, &folders, mode).await?;
        }
        Commands::Chat => {
            chat::run_chat(&cfg).await?;
        }
    }

    Ok(())
}
