//! # World Cup RAG CLI (`wcr`)
//!
//! ## Usage
//!
//! ```bash
//! wcr --config ./config/wcr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wcr build` | Materialize statements, chunk, embed, and persist the index |
//! | `wcr facts` | Print the statements the dataset produces |
//! | `wcr search "<query>"` | Retrieval only: ranked chunks with similarity |
//! | `wcr ask "<query>"` | Run the full answer pipeline once |
//! | `wcr serve` | Build the index if missing, then start the HTTP API |
//! | `wcr status` | Show the persisted index manifest and configuration |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use worldcup_rag::answer::{embedder_for_manifest, Pipeline};
use worldcup_rag::builder::{collect_statements, ensure_index};
use worldcup_rag::config::{self, Config};
use worldcup_rag::dataset::load_dataset;
use worldcup_rag::index_store::{load_index, read_manifest};
use worldcup_rag::server;
use worldcup_rag_core::embedding::embed_query;
use worldcup_rag_core::retrieve::retrieve;

const DEFAULT_CONFIG: &str = "./config/wcr.toml";

/// World Cup RAG: question answering over FIFA World Cup history.
#[derive(Parser)]
#[command(name = "wcr", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `./config/wcr.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the dataset.
    Build {
        /// Rebuild even if an index already exists.
        #[arg(long)]
        force: bool,
    },

    /// Print materialized statements.
    Facts {
        /// Only statements for this tournament year.
        #[arg(long)]
        year: Option<u16>,
    },

    /// Retrieve chunks for a query without calling a language model.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer one question through the full pipeline.
    Ask { query: String },

    /// Start the HTTP API.
    Serve {
        /// Rebuild the index before serving.
        #[arg(long)]
        rebuild: bool,
    },

    /// Show index and configuration status.
    Status,
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG))
        }
        None => {
            warn!("{} not found, using built-in defaults", DEFAULT_CONFIG);
            Ok(Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { force } => match ensure_index(&cfg, force).await? {
            Some(report) => {
                let m = &report.manifest;
                println!("Index built at {}", cfg.index.dir.display());
                println!("  build id:    {}", m.build_id);
                println!(
                    "  embedding:   {}/{} ({} dims)",
                    m.embedding_provider, m.embedding_model, m.dims
                );
                println!("  statements:  {}", m.statement_count);
                println!("  chunks:      {}", m.chunk_count);
                println!("  batches:     {} ({} failed)", report.batches, report.failed_batches);
                if report.failed_chunks > 0 {
                    println!("  skipped:     {} chunks", report.failed_chunks);
                }
            }
            None => {
                println!(
                    "Index already exists at {} (use --force to rebuild)",
                    cfg.index.dir.display()
                );
            }
        },
        Commands::Facts { year } => {
            let dataset = load_dataset(&cfg.data)?;
            let statements = collect_statements(&dataset);
            let mut shown = 0;
            for s in statements.iter().filter(|s| year.is_none() || s.year == year) {
                let flag = if s.disambiguation { " ≠" } else { "" };
                println!("[{}] ({}{}) {}", s.id, s.category, flag, s.text);
                shown += 1;
            }
            println!("\n{} statements", shown);
        }
        Commands::Search { query, k } => {
            let (index, manifest) = load_index(&cfg.index.dir).await?;
            let embedder = embedder_for_manifest(&manifest, &cfg.embedding).await?;
            let mut params = cfg.retrieval.params();
            if let Some(k) = k {
                params.k = k;
                params.fetch_k = params.fetch_k.max(k);
            }
            let vector = embed_query(embedder.as_ref(), &query).await?;
            let results = retrieve(&index, &vector, &params);
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] ({}) {}",
                    i + 1,
                    r.similarity,
                    r.chunk.granularity,
                    r.chunk.text.replace('\n', " | ")
                );
                println!("    statements: {}", r.chunk.source_statement_ids.join(", "));
            }
        }
        Commands::Ask { query } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let response = pipeline.answer(&query).await;
            println!("{}", response.answer);
            println!("\n[{}] {}", if response.success { "ok" } else { "failed" }, response.message);
        }
        Commands::Serve { rebuild } => {
            server::run_server(&cfg, rebuild).await?;
        }
        Commands::Status => {
            println!("Index directory: {}", cfg.index.dir.display());
            match read_manifest(&cfg.index.dir).await? {
                Some(m) => {
                    println!("  build id:    {}", m.build_id);
                    println!("  built at:    {}", m.built_at);
                    println!(
                        "  embedding:   {}/{} ({} dims)",
                        m.embedding_provider, m.embedding_model, m.dims
                    );
                    println!("  statements:  {}", m.statement_count);
                    println!("  chunks:      {}", m.chunk_count);
                    let levels: Vec<String> = m
                        .levels
                        .iter()
                        .map(|l| format!("{} {}/{}", l.granularity, l.size, l.overlap))
                        .collect();
                    println!("  levels:      {}", levels.join(", "));
                    println!("  data:        {}", m.data_fingerprint);
                }
                None => println!("  no index (run `wcr build`)"),
            }
            let r = cfg.retrieval.params();
            println!(
                "Retrieval: k={} fetch_k={} lambda={} threshold={}",
                r.k, r.fetch_k, r.lambda, r.score_threshold
            );
            let embedders: Vec<String> = cfg
                .embedding
                .candidates
                .iter()
                .map(|c| c.to_string())
                .collect();
            println!("Embedding candidates: {}", embedders.join(" → "));
            let models: Vec<String> = cfg.llm.candidates.iter().map(|c| c.to_string()).collect();
            println!("LLM candidates: {}", models.join(" → "));
            println!("LLM timeout: {}s", cfg.llm.timeout_secs);
            println!("Cache capacity: {}", cfg.cache.capacity);
        }
    }

    Ok(())
}
