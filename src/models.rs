//! Core data models used throughout PKA.
//!
//! These types mirror the relational schema (see `migrate.rs`) and the
//! wire payloads exchanged with the chat model and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Source file type, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Md,
    Pdf,
    Email,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Md => "md",
            DocumentType::Pdf => "pdf",
            DocumentType::Email => "email",
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md" => Ok(DocumentType::Md),
            "pdf" => Ok(DocumentType::Pdf),
            "email" => Ok(DocumentType::Email),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// A source file the system knows about (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub title: String,
    #[sqlx(rename = "type")]
    pub doc_type: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub confidentiality_tag: String,
    pub sha256: String,
    pub size: i64,
    pub meta: String,
}

/// A retrievable unit of text (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub ordinal: i64,
    pub text: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub page_no: Option<i64>,
    pub token_count: Option<i64>,
    #[serde(skip)]
    pub embedding: Vec<u8>,
    pub meta: String,
}

/// One audit-trail record for a question (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QARun {
    pub id: String,
    pub question: String,
    pub mode: String,
    pub llm_version: String,
    pub prompt_version: String,
    pub template_hash: String,
    pub started_at: i64,
    pub latency_ms: Option<i64>,
    pub abstained: bool,
}

/// A single retrieved-and-cited chunk within a run (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QAContext {
    pub id: i64,
    pub run_id: String,
    pub chunk_id: Option<i64>,
    pub rank: i64,
    pub score_bm25: Option<f64>,
    pub score_embed: Option<f64>,
    pub score_rerank: Option<f64>,
    pub rationale: Option<String>,
}

/// The persisted, schema-validated answer for a run (spec §3).
#[derive(Debug, Clone, FromRow)]
pub struct QAAnswerRow {
    pub run_id: String,
    pub answer_json: String,
}

/// A citation source reference within an [`Answer`] (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationSource {
    pub id: String,
    pub loc: String,
}

/// A claim with conflicting source support (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictEntry {
    pub claim: String,
    pub sources: Vec<CitationSource>,
}

/// The schema-validated answer object produced by the synthesis engine
/// (spec §6 — Answer JSON schema).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub abstain: bool,
    pub answer: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
    #[serde(default)]
    pub sources: Vec<CitationSource>,
}

/// One hybrid-retrieval hit, carrying both BM25 and vector provenance
/// before diversity-cap filtering (spec §4.6).
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub path: String,
    pub title: String,
    pub text: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub page_no: Option<i64>,
    pub token_count: Option<i64>,
    pub score_bm25: Option<f64>,
    pub score_embed: Option<f64>,
    pub distance: Option<f64>,
    pub rank_bm25: Option<usize>,
    pub rank_embed: Option<usize>,
}

/// A context snippet formatted for the prompt and for the API response
/// (spec §4.7, §6).
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnippet {
    pub chunk_id: i64,
    pub document_id: i64,
    pub citation: String,
    pub rationale: String,
    pub content: String,
    pub score_bm25: Option<f64>,
    pub score_embed: Option<f64>,
}

/// Summary row for `GET /api/replay?limit=N` (spec §4.9, §6).
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub question: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub latency_ms: Option<i64>,
    pub abstained: bool,
}

/// A fully reconstructed run, as returned by `GET /api/replay/{run_id}`
/// (spec §4.9).
#[derive(Debug, Clone, Serialize)]
pub struct ReplayRecord {
    pub run_id: String,
    pub question: String,
    pub mode: String,
    pub latency_ms: Option<i64>,
    pub answer: Answer,
    pub context: Vec<ContextSnippet>,
}
