//! HTTP API server (spec §6).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Ask a question; retrieves, synthesizes, persists, and returns the run |
//! | `GET`  | `/api/replay/{run_id}` | Reconstruct a prior run |
//! | `GET`  | `/api/replay?limit=N` | List recent run summaries |
//! | `GET`  | `/api/docs/{id}` | Fetch a document's metadata and chunk count |
//! | `GET`  | `/health/` | Readiness probe against the chat model daemon |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "run abc123 does not exist" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based clients
//! can reach the API directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::context_builder::ContextBuilder;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::PkaError;
use crate::health::ReadinessService;
use crate::lexical::LexicalIndex;
use crate::models::{Answer, ContextSnippet, ReplayRecord, RunSummary};
use crate::retrieval::RetrievalOrchestrator;
use crate::run_store::RunStore;
use crate::synthesis::SynthesisEngine;
use crate::templates::PromptTemplateRegistry;
use crate::vector::{Metric, VectorIndex};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    embedder: Arc<EmbeddingClient>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    orchestrator: Arc<RetrievalOrchestrator>,
    context_builder: Arc<ContextBuilder>,
    synthesis: Arc<SynthesisEngine>,
    run_store: Arc<RunStore>,
    readiness: Arc<ReadinessService>,
    pool: sqlx::SqlitePool,
    llm_version: String,
    prompt_version: String,
    template_hash: String,
}

/// Starts the HTTP API server.
///
/// Binds to the address configured in `[server].bind` and registers all
/// route handlers. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let lexical = LexicalIndex::open(&config.lexical.path)?;
    let metric = Metric::parse(&config.retrieval.metric)?;
    let vector = VectorIndex::new(pool.clone(), metric);
    let embedder = EmbeddingClient::new(&config.embedding)?;
    let orchestrator = RetrievalOrchestrator::new(
        pool.clone(),
        config.retrieval.max_bm25,
        config.retrieval.max_vector,
        config.retrieval.final_limit,
        config.retrieval.diversity_cap,
    );
    let context_builder = ContextBuilder::new(config.retrieval.context_max_length);
    let synthesis = SynthesisEngine::new(&config.synthesis)?;
    let run_store = RunStore::new(pool.clone());
    let readiness = ReadinessService::new(&config.synthesis);

    let registry = PromptTemplateRegistry::with_defaults();
    let template = registry.get(&config.synthesis.template_name)?;
    let template_hash = format!("{:x}", Sha256::digest(template.content.as_bytes()));
    let prompt_version = template.version.clone();
    let llm_version = config.synthesis.model.clone();

    let state = AppState {
        embedder: Arc::new(embedder),
        lexical: Arc::new(lexical),
        vector: Arc::new(vector),
        orchestrator: Arc::new(orchestrator),
        context_builder: Arc::new(context_builder),
        synthesis: Arc::new(synthesis),
        run_store: Arc::new(run_store),
        readiness: Arc::new(readiness),
        pool,
        llm_version,
        prompt_version,
        template_hash,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/replay/{run_id}", get(handle_replay_one))
        .route("/api/replay", get(handle_replay_list))
        .route("/api/docs/{id}", get(handle_docs_get))
        .route("/health/", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %bind_addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PkaError> for AppError {
    fn from(err: PkaError) -> Self {
        AppError {
            status: err.status(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "synthesize".to_string()
}

#[derive(Serialize)]
struct ChatResponse {
    run_id: String,
    latency_ms: i64,
    answer: Answer,
    context: Vec<ContextSnippet>,
    question: String,
    mode: String,
    llm_version: String,
    prompt_version: String,
    template_hash: String,
}

const VALID_MODES: &[&str] = &["synthesize", "lookup", "timeline", "flashcards"];

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if !VALID_MODES.contains(&req.mode.as_str()) {
        return Err(bad_request(format!(
            "Unknown mode: {}. Use synthesize, lookup, timeline, or flashcards.",
            req.mode
        )));
    }

    let started = Instant::now();

    let hits = state
        .orchestrator
        .retrieve(&req.question, &state.embedder, &state.lexical, &state.vector)
        .await?;
    let snippets = state.context_builder.build(&hits);
    let answer = state.synthesis.generate(&req.question, &snippets, &req.mode).await?;

    let run_id = state
        .run_store
        .create_run(
            &req.question,
            &req.mode,
            &state.llm_version,
            &state.prompt_version,
            &state.template_hash,
        )
        .await?;
    state.run_store.write_contexts(&run_id, &hits).await?;
    state.run_store.write_answer(&run_id, &answer).await?;

    let latency_ms = started.elapsed().as_millis() as i64;
    state.run_store.finalize_run(&run_id, latency_ms, answer.abstain).await?;

    Ok(Json(ChatResponse {
        run_id,
        latency_ms,
        answer,
        context: snippets,
        question: req.question,
        mode: req.mode,
        llm_version: state.llm_version.clone(),
        prompt_version: state.prompt_version.clone(),
        template_hash: state.template_hash.clone(),
    }))
}

// ============ GET /api/replay/{run_id} ============

async fn handle_replay_one(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ReplayRecord>, AppError> {
    let record = state.run_store.replay(&run_id).await?;
    record
        .map(Json)
        .ok_or_else(|| not_found(format!("run {run_id} does not exist")))
}

// ============ GET /api/replay?limit=N ============

#[derive(Deserialize)]
struct ReplayListQuery {
    #[serde(default = "default_replay_limit")]
    limit: i64,
}

fn default_replay_limit() -> i64 {
    20
}

#[derive(Serialize)]
struct ReplayListResponse {
    runs: Vec<RunSummary>,
}

async fn handle_replay_list(
    State(state): State<AppState>,
    Query(query): Query<ReplayListQuery>,
) -> Result<Json<ReplayListResponse>, AppError> {
    let runs = state.run_store.list_runs(query.limit).await?;
    Ok(Json(ReplayListResponse { runs }))
}

// ============ GET /api/docs/{id} ============

#[derive(Serialize)]
struct DocumentChunkPreview {
    id: i64,
    ordinal: i64,
    preview: String,
    start_line: Option<i64>,
    end_line: Option<i64>,
    page_no: Option<i64>,
    token_count: Option<i64>,
}

#[derive(Serialize)]
struct DocumentResponse {
    id: i64,
    path: String,
    title: String,
    #[serde(rename = "type")]
    doc_type: String,
    size: i64,
    sha256: String,
    created_at: i64,
    updated_at: i64,
    confidentiality_tag: String,
    meta: String,
    chunk_count: i64,
    chunks: Vec<DocumentChunkPreview>,
}

#[allow(clippy::type_complexity)]
async fn handle_docs_get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DocumentResponse>, AppError> {
    let row: Option<(i64, String, String, String, i64, String, i64, i64, String, String)> = sqlx::query_as(
        "SELECT id, path, title, type, size, sha256, created_at, updated_at, confidentiality_tag, meta \
         FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| AppError::from(PkaError::Ingestion(e.to_string())))?;

    let Some((id, path, title, doc_type, size, sha256, created_at, updated_at, confidentiality_tag, meta)) = row
    else {
        return Err(not_found(format!("document {id} does not exist")));
    };

    let chunk_rows: Vec<(i64, i64, String, Option<i64>, Option<i64>, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT id, ordinal, text, start_line, end_line, page_no, token_count \
         FROM chunks WHERE document_id = ? ORDER BY ordinal",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| AppError::from(PkaError::Ingestion(e.to_string())))?;

    let chunks: Vec<DocumentChunkPreview> = chunk_rows
        .into_iter()
        .map(
            |(id, ordinal, text, start_line, end_line, page_no, token_count)| DocumentChunkPreview {
                id,
                ordinal,
                preview: text,
                start_line,
                end_line,
                page_no,
                token_count,
            },
        )
        .collect();

    Ok(Json(DocumentResponse {
        id,
        path,
        title,
        doc_type,
        size,
        sha256,
        created_at,
        updated_at,
        confidentiality_tag,
        meta,
        chunk_count: chunks.len() as i64,
        chunks,
    }))
}

// ============ GET /health/ ============

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.readiness.run_checks().await;
    let code = if status.status == "pass" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
