//! CLI module
//!
//! tafsiir-rag command definitions and handlers: `ingest` builds the vector
//! store from the corpus JSON, `serve` runs the chat HTTP API, `ask` and
//! `search` exercise the pipeline from the terminal, `status` inspects the
//! configuration and store manifest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::embedding::{create_embedder, has_api_key};
use crate::ingest::{IngestConfig, IngestPipeline};
use crate::query::{ChatConfig, ChatError, ChatService};
use crate::store::{default_store_path, get_data_dir, LanceChunkStore, StoreManifest};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "tafsiir-rag")]
#[command(version, about = "Somali Quran tafsiir RAG pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the vector store from a Quran corpus JSON file
    Ingest {
        /// Corpus JSON path
        #[arg(long, default_value = "data/quran.json")]
        corpus: PathBuf,

        /// Vector store path (deleted and rebuilt)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Verses per chunk
        #[arg(long, default_value_t = 5)]
        chunk_size: usize,

        /// Delay between embedding requests (ms)
        #[arg(long, default_value_t = 4000)]
        delay_ms: u64,

        /// Delay after a failed chunk (ms)
        #[arg(long, default_value_t = 5000)]
        backoff_ms: u64,
    },

    /// Serve the chat HTTP API
    Serve {
        /// Address to bind (host:port)
        #[arg(long, env = "TAFSIIR_BIND", default_value = "127.0.0.1:8080")]
        bind: String,

        /// Vector store path
        #[arg(long)]
        store: Option<PathBuf>,

        /// Chunks retrieved per question
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Ask one question through the full pipeline
    Ask {
        /// The question
        question: String,

        /// Vector store path
        #[arg(long)]
        store: Option<PathBuf>,

        /// Chunks retrieved for grounding
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Search the vector store without generating an answer
    Search {
        /// Search query
        query: String,

        /// Vector store path
        #[arg(long)]
        store: Option<PathBuf>,

        /// Result count
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Show configuration and store status
    Status {
        /// Vector store path
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Run a parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            corpus,
            store,
            chunk_size,
            delay_ms,
            backoff_ms,
        } => cmd_ingest(corpus, store, chunk_size, delay_ms, backoff_ms).await,
        Commands::Serve { bind, store, top_k } => cmd_serve(bind, store, top_k).await,
        Commands::Ask {
            question,
            store,
            top_k,
        } => cmd_ask(&question, store, top_k).await,
        Commands::Search {
            query,
            store,
            top_k,
        } => cmd_search(&query, store, top_k).await,
        Commands::Status { store } => cmd_status(store).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Ingest command: full corpus rebuild.
async fn cmd_ingest(
    corpus: PathBuf,
    store: Option<PathBuf>,
    chunk_size: usize,
    delay_ms: u64,
    backoff_ms: u64,
) -> Result<()> {
    // Credentials are validated before the pipeline can touch the old store
    let embedder = create_embedder().context("embedding credentials missing")?;

    let config = IngestConfig {
        corpus_path: corpus.clone(),
        store_path: store.unwrap_or_else(default_store_path),
        chunk_size,
        request_delay: Duration::from_millis(delay_ms),
        error_backoff: Duration::from_millis(backoff_ms),
    };

    println!("[*] Ingesting corpus: {}", corpus.display());
    println!("    Store: {}", config.store_path.display());

    let pipeline = IngestPipeline::new(Arc::new(embedder), config);
    let report = pipeline.run().await?;

    println!();
    println!(
        "[OK] Ingested {} chunks ({} skipped), {} on disk",
        report.chunk_count,
        report.skipped,
        format_bytes(report.stats.size_bytes as usize)
    );

    Ok(())
}

/// Serve command: chat HTTP API.
async fn cmd_serve(bind: String, store: Option<PathBuf>, top_k: usize) -> Result<()> {
    let config = ChatConfig {
        store_path: store.unwrap_or_else(default_store_path),
        top_k,
        ..ChatConfig::default()
    };

    let chat = match ChatService::from_env(config) {
        Ok(service) => service,
        Err(ChatError::MissingApiKey) => bail!(
            "API key not configured.\n\n\
             Setup:\n  \
             export GOOGLE_API_KEY=your-api-key\n  \
             or\n  \
             export GEMINI_API_KEY=your-api-key\n\n\
             Get a key at: https://aistudio.google.com/app/apikey"
        ),
        Err(e) => return Err(e.into()),
    };

    crate::server::serve(&bind, Arc::new(chat)).await
}

/// Ask command: one question through the full pipeline.
async fn cmd_ask(question: &str, store: Option<PathBuf>, top_k: usize) -> Result<()> {
    let config = ChatConfig {
        store_path: store.unwrap_or_else(default_store_path),
        top_k,
        ..ChatConfig::default()
    };

    let chat = ChatService::from_env(config).context("failed to initialize chat service")?;

    println!("[*] Asking: \"{}\"", question);

    let reply = match chat.answer(question).await {
        Ok(reply) => reply,
        Err(ChatError::RateLimited) => {
            println!("\n[!] {}", crate::query::QUOTA_MESSAGE);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("{}", reply.text);

    if let Some(sources) = reply.sources {
        if !sources.is_empty() {
            println!();
            println!("[*] Sources:");
            for source in sources {
                println!("    [{:.4}] {}", source.score, source.title);
            }
        }
    }

    Ok(())
}

/// Search command: retrieval only, no generation.
async fn cmd_search(query: &str, store: Option<PathBuf>, top_k: usize) -> Result<()> {
    use crate::embedding::EmbeddingProvider;

    let embedder = create_embedder().context("embedding credentials missing")?;
    let store_path = store.unwrap_or_else(default_store_path);

    println!("[*] Searching: \"{}\"", query);

    let store = LanceChunkStore::open_read_only(&store_path)
        .await
        .context("vector store not ready; run `tafsiir-rag ingest` first")?;

    let query_embedding = embedder.embed(query).await?;
    let hits = store.search(&query_embedding, top_k).await?;

    if hits.is_empty() {
        println!("\n[!] No results.");
        return Ok(());
    }

    println!("\n[OK] {} result(s):\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [score: {:.4}] {}", i + 1, hit.score, hit.title);
        println!("   {}", truncate_text(&hit.text, 200));
        println!();
    }

    Ok(())
}

/// Status command: configuration and store manifest.
async fn cmd_status(store: Option<PathBuf>) -> Result<()> {
    println!("tafsiir-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] Data directory: {}", get_data_dir().display());

    if has_api_key() {
        println!("[OK] API key: configured");
    } else {
        println!("[!] API key: not set");
        println!("    Setup: export GOOGLE_API_KEY=your-key");
    }

    let store_path = store.unwrap_or_else(default_store_path);
    println!("[*] Store: {}", store_path.display());

    match StoreManifest::load(&store_path) {
        Ok(Some(manifest)) if manifest.sealed => {
            println!(
                "[OK] Sealed store: {} chunks, {}",
                manifest.chunk_count,
                format_bytes(manifest.size_bytes as usize)
            );
            println!("     Embedding: {}", manifest.embedding_identity);
        }
        Ok(Some(_)) => {
            println!("[!] Store is not sealed (ingestion incomplete)");
        }
        Ok(None) => {
            println!("[!] No store found; run `tafsiir-rag ingest` first");
        }
        Err(e) => {
            println!("[!] Failed to read store manifest: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Truncate text for display (UTF-8 safe), collapsing newlines.
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Format a byte count for display.
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
