//! # Recall CLI (`recall`)
//!
//! The `recall` binary is the primary interface for the knowledge engine.
//! It provides commands for database initialization, document ingestion,
//! semantic search, document management, and starting the tool server.
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall ingest <file> --user <id>` | Ingest a document for a user |
//! | `recall search "<query>" --user <id>` | Search a user's knowledge base |
//! | `recall documents --user <id>` | List a user's documents |
//! | `recall get <doc-id> --user <id>` | Print one document with its chunks |
//! | `recall delete <doc-id> --user <id>` | Delete a document (cascades to chunks) |
//! | `recall serve` | Start the HTTP tool server |

mod chunk;
mod config;
mod db;
mod documents;
mod embedding;
mod error;
mod extract;
mod ingest;
mod migrate;
mod models;
mod rank;
mod sanitize;
mod search;
mod server;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Recall CLI — a personal-knowledge retrieval engine for AI assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Recall — a personal-knowledge retrieval engine for AI assistants",
    version,
    long_about = "Recall ingests uploaded documents (PDF, DOCX, plain text, Markdown, EPUB), \
    chunks and embeds them per user, and answers natural-language queries by ranking stored \
    passages against the query embedding with an adaptive relevance threshold."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks). Idempotent — running it multiple times is safe.
    Init,

    /// Ingest a document for a user.
    ///
    /// Extracts text from the file, sanitizes and chunks it, embeds each
    /// chunk through the configured provider, and commits the document
    /// with its full chunk set atomically. A chunk whose embedding call
    /// fails is persisted without a vector rather than failing the upload.
    Ingest {
        /// Path to the file to ingest (pdf, docx, txt, md, epub).
        file: PathBuf,

        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// Search a user's knowledge base.
    ///
    /// Embeds the query, ranks the user's stored passages by cosine
    /// similarity, and prints ranked results with provenance and
    /// relevance labels.
    Search {
        /// The search query string.
        query: String,

        /// Requesting user identifier.
        #[arg(long)]
        user: String,

        /// Maximum results to return (clamped to 1–10).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity threshold (clamped to 0.0–1.0).
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Adapt the threshold to the query length (short queries favor
        /// recall, long queries favor precision).
        #[arg(long)]
        dynamic_threshold: bool,
    },

    /// List a user's documents.
    Documents {
        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// Print one document's metadata, body, and chunks.
    Get {
        /// Document UUID.
        id: String,

        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// Delete a document and its chunks.
    Delete {
        /// Document UUID.
        id: String,

        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// Start the HTTP tool server.
    ///
    /// Exposes search, upload, and document management as JSON endpoints
    /// for the conversational tool layer.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recall=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, user } => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            ingest::run_ingest(&cfg, &store, embedder, &user, &file).await?;
        }
        Commands::Search {
            query,
            user,
            limit,
            min_similarity,
            dynamic_threshold,
        } => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let request = search::SearchRequest {
                query,
                limit,
                min_similarity,
                dynamic_threshold,
            };
            search::run_search(&store, embedder.as_ref(), &cfg.retrieval, &user, &request).await?;
        }
        Commands::Documents { user } => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            documents::run_documents(&store, &user).await?;
        }
        Commands::Get { id, user } => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            documents::run_get(&store, &user, &id).await?;
        }
        Commands::Delete { id, user } => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            documents::run_delete(&store, &user, &id).await?;
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            let store = store::KnowledgeStore::new(pool);
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            server::run_server(&cfg, store, embedder).await?;
        }
    }

    Ok(())
}
