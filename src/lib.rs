//! # pka
//!
//! **A privacy-preserving personal knowledge analyst.**
//!
//! pka answers questions over a personal corpus of Markdown notes,
//! text-layer PDFs, and exported email, using a locally-hosted chat model
//! that must cite its sources or abstain. Nothing leaves the machine: the
//! embedding and chat models are both reached over a local RPC daemon
//! (e.g. Ollama), and every answer is backed by an auditable, replayable
//! run record.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ Notes/PDF/Mail│──▶│ Chunk+Embed │──▶│ SQLite+Tantivy │
//! └───────────────┘   └─────────────┘   └───────┬───────┘
//!                                                │
//!                         ┌──────────────────────┤
//!                         ▼                      ▼
//!                  ┌─────────────┐        ┌─────────────┐
//!                  │  Retrieval   │──────▶│  Synthesis   │
//!                  │ (BM25+Vector)│        │(cite/abstain)│
//!                  └─────────────┘        └──────┬──────┘
//!                                                 ▼
//!                                          ┌─────────────┐
//!                                          │  Run Store   │
//!                                          │ (audit/replay)│
//!                                          └──────┬──────┘
//!                                                 ▼
//!                                         CLI (`pka`) / HTTP API
//! ```
//!
//! ## Data Flow
//!
//! 1. **Ingestion** ([`ingest`]) discovers files under the configured source
//!    directories, content-hashes them for idempotent re-ingest, and routes
//!    each to the matching chunker ([`chunk`]).
//! 2. Chunks are embedded via the **embedding client** ([`embedding`]) and
//!    persisted in one transaction per document; the lexical index
//!    ([`lexical`]) is reconciled strictly after that transaction commits.
//! 3. A question is answered by the **retrieval orchestrator**
//!    ([`retrieval`]), which fuses BM25 ([`lexical`]) and vector
//!    ([`vector`]) hits by rank order under a per-document diversity cap.
//! 4. Retrieved hits are normalized, clipped, and cited by the
//!    **context builder** ([`context_builder`]) before being handed to the
//!    **synthesis engine** ([`synthesis`]), which enforces the cite-or-abstain
//!    JSON contract against a locally-hosted chat model.
//! 5. Every run — question, retrieved context, and answer — is persisted
//!    and replayable via the **run store** ([`run_store`]).
//! 6. Results are exposed via the **CLI** (`pka`) and the **HTTP API**
//!    ([`server`]); readiness is probed by [`health`] and answer quality by
//!    [`eval`].
//!
//! ## Quick Start
//!
//! ```bash
//! pka init                                  # create database
//! pka ingest                                # chunk and embed notes/pdfs/email
//! pka ask "What did we decide about the Q3 budget?"
//! pka serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `QARun`, `Answer` |
//! | [`chunk`] | Markdown, PDF, and email chunkers |
//! | [`embedding`] | Embedding RPC client and vector utilities |
//! | [`lexical`] | Tantivy-backed BM25 full-text index |
//! | [`vector`] | Brute-force embedding similarity search |
//! | [`ingest`] | Discovery → chunk → embed → persist pipeline |
//! | [`retrieval`] | Hybrid rank-fusion retrieval with diversity cap |
//! | [`context_builder`] | Snippet normalization, clipping, and citation |
//! | [`templates`] | Versioned prompt templates |
//! | [`synthesis`] | Cite-or-abstain chat synthesis engine |
//! | [`run_store`] | Run/context/answer persistence and replay |
//! | [`health`] | Chat daemon readiness probes |
//! | [`eval`] | Golden-dataset evaluation runner |
//! | [`server`] | HTTP API (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! pka is configured via a TOML file (default: `config/pka.toml`). See
//! [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod chunk;
pub mod config;
pub mod context_builder;
pub mod db;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod health;
pub mod ingest;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod run_store;
pub mod server;
pub mod synthesis;
pub mod templates;
pub mod vector;
