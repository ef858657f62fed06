//! # pka
//!
//! A privacy-preserving personal knowledge analyst: local retrieval-augmented
//! question answering over notes, PDFs, and email, with a locally-hosted
//! chat model that must cite sources or abstain.
//!
//! ## Architecture
//!
//! ```text
//! Notes/PDFs/Email → Chunk+Embed → SQLite + Tantivy → Hybrid Retrieval → Synthesis (cite-or-abstain) → CLI / HTTP
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types: `Document`, `Chunk`, `QARun`, `Answer`
//! - [`chunk`] — Markdown, PDF, and email chunkers
//! - [`embedding`] — Embedding RPC client and vector utilities
//! - [`lexical`] — Tantivy-backed BM25 index
//! - [`vector`] — Brute-force embedding similarity search
//! - [`ingest`] — Discovery, chunking, embedding, and persistence pipeline
//! - [`retrieval`] — Hybrid rank-fusion retrieval with diversity cap
//! - [`context_builder`] — Snippet normalization, clipping, and citation
//! - [`templates`] — Versioned prompt templates
//! - [`synthesis`] — Cite-or-abstain chat synthesis engine
//! - [`run_store`] — Run/context/answer persistence and replay
//! - [`health`] — Chat daemon readiness probes
//! - [`eval`] — Golden-dataset evaluation runner
//! - [`server`] — HTTP API (Axum)
//! - [`db`] — SQLite connection management
//! - [`migrate`] — Database schema migrations

mod chunk;
mod config;
mod context_builder;
mod db;
mod embedding;
mod error;
mod eval;
mod health;
mod ingest;
mod lexical;
mod migrate;
mod models;
mod retrieval;
mod run_store;
mod server;
mod synthesis;
mod templates;
mod vector;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pka",
    about = "pka — a privacy-preserving personal knowledge analyst",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/pka.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Ingest notes, PDFs, and emails from the configured source directories
    Ingest,

    /// Ask a question against the indexed knowledge base
    Ask {
        /// The question to ask
        question: String,

        /// Answer mode: synthesize, lookup, timeline, or flashcards
        #[arg(long, default_value = "synthesize")]
        mode: String,
    },

    /// Replay a prior run, or list recent runs
    Replay {
        /// Run id to replay
        run_id: Option<String>,

        /// List the most recent runs instead of replaying one
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Start the HTTP API server
    Serve,

    /// Run the golden-dataset evaluation suite against a running server
    Eval {
        /// Path to the evaluation dataset YAML
        #[arg(long)]
        dataset: PathBuf,

        /// Path to write the markdown report
        #[arg(long, default_value = "eval_report.md")]
        report: PathBuf,

        /// Root URL of the running API server
        #[arg(long, default_value = "http://localhost:8080")]
        base_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            let pool = db::connect(&cfg).await?;
            let lexical = lexical::LexicalIndex::open(&cfg.lexical.path)?;
            let embedder = embedding::EmbeddingClient::new(&cfg.embedding)?;
            let report = ingest::ingest_all(&cfg, &pool, &lexical, &embedder).await?;
            println!(
                "Ingested {} documents ({} unchanged, {} failed, {} chunks written).",
                report.documents_ingested,
                report.documents_unchanged,
                report.documents_failed,
                report.chunks_written
            );
            for (path, message) in &report.errors {
                eprintln!("  failed: {} — {message}", path.display());
            }
        }
        Commands::Ask { question, mode } => {
            run_ask(&cfg, &question, &mode).await?;
        }
        Commands::Replay { run_id, limit } => {
            run_replay(&cfg, run_id, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Eval { dataset, report, base_url } => {
            let runner = eval::EvaluationRunner::new(&base_url, 30);
            let result = runner.run(&dataset).await?;
            std::fs::write(&report, eval::render_markdown_report(&result))?;
            println!("{}", serde_json::to_string_pretty(&result.summary)?);
        }
    }

    Ok(())
}

async fn run_ask(cfg: &config::Config, question: &str, mode: &str) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let lexical = lexical::LexicalIndex::open(&cfg.lexical.path)?;
    let metric = vector::Metric::parse(&cfg.retrieval.metric)?;
    let vector_index = vector::VectorIndex::new(pool.clone(), metric);
    let embedder = embedding::EmbeddingClient::new(&cfg.embedding)?;
    let orchestrator = retrieval::RetrievalOrchestrator::new(
        pool.clone(),
        cfg.retrieval.max_bm25,
        cfg.retrieval.max_vector,
        cfg.retrieval.final_limit,
        cfg.retrieval.diversity_cap,
    );
    let context_builder = context_builder::ContextBuilder::new(cfg.retrieval.context_max_length);
    let synthesis = synthesis::SynthesisEngine::new(&cfg.synthesis)?;

    let hits = orchestrator.retrieve(question, &embedder, &lexical, &vector_index).await?;
    let snippets = context_builder.build(&hits);
    let answer = synthesis.generate(question, &snippets, mode).await?;

    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

async fn run_replay(cfg: &config::Config, run_id: Option<String>, limit: Option<i64>) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let store = run_store::RunStore::new(pool);

    match run_id {
        Some(run_id) => match store.replay(&run_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("run {run_id} does not exist"),
        },
        None => {
            let runs = store.list_runs(limit.unwrap_or(20)).await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
    }

    Ok(())
}
