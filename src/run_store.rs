//! `RunStore` — persists QA runs, their retrieved contexts, and answers
//! for audit and replay (spec §4.9).
//!
//! Grounded on `original_source/pka/app/services/retrieval/store.py`
//! (`RetrievalStore`).

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::PkaError;
use crate::models::{Answer, ContextSnippet, ReplayRecord, RetrievalHit, RunSummary};

pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new run record and return its id.
    pub async fn create_run(
        &self,
        question: &str,
        mode: &str,
        llm_version: &str,
        prompt_version: &str,
        template_hash: &str,
    ) -> Result<String, PkaError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO qa_runs (id, question, mode, llm_version, prompt_version, template_hash, started_at, latency_ms, abstained)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 0)
            "#,
        )
        .bind(&run_id)
        .bind(question)
        .bind(mode)
        .bind(llm_version)
        .bind(prompt_version)
        .bind(template_hash)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PkaError::Ingestion(format!("failed to create run: {e}")))?;
        Ok(run_id)
    }

    /// Record the retrieval hits selected for a run, in rank order.
    pub async fn write_contexts(&self, run_id: &str, hits: &[RetrievalHit]) -> Result<(), PkaError> {
        for (index, hit) in hits.iter().enumerate() {
            let rank = (index + 1) as i64;
            let rationale = compose_rationale(hit);
            sqlx::query(
                r#"
                INSERT INTO qa_contexts (run_id, chunk_id, rank, score_bm25, score_embed, score_rerank, rationale)
                VALUES (?, ?, ?, ?, ?, NULL, ?)
                "#,
            )
            .bind(run_id)
            .bind(hit.chunk_id)
            .bind(rank)
            .bind(hit.score_bm25)
            .bind(hit.score_embed)
            .bind(rationale)
            .execute(&self.pool)
            .await
            .map_err(|e| PkaError::Ingestion(format!("failed to write context: {e}")))?;
        }
        Ok(())
    }

    /// Persist the final answer JSON for a run.
    pub async fn write_answer(&self, run_id: &str, answer: &Answer) -> Result<(), PkaError> {
        let answer_json = serde_json::to_string(answer)
            .map_err(|e| PkaError::Ingestion(format!("failed to serialize answer: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO qa_answers (run_id, answer_json) VALUES (?, ?)
            ON CONFLICT(run_id) DO UPDATE SET answer_json = excluded.answer_json
            "#,
        )
        .bind(run_id)
        .bind(answer_json)
        .execute(&self.pool)
        .await
        .map_err(|e| PkaError::Ingestion(format!("failed to write answer: {e}")))?;
        Ok(())
    }

    /// Stamp a run's latency and abstain outcome once synthesis completes.
    ///
    /// A missing run is logged, not returned as an error: by the time this
    /// is called the answer is already persisted, so failing the request
    /// over a bookkeeping mismatch would throw away a good answer.
    pub async fn finalize_run(&self, run_id: &str, latency_ms: i64, abstained: bool) -> Result<(), PkaError> {
        let result = sqlx::query("UPDATE qa_runs SET latency_ms = ?, abstained = ? WHERE id = ?")
            .bind(latency_ms)
            .bind(abstained)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PkaError::Ingestion(format!("failed to finalize run: {e}")))?;
        if result.rows_affected() == 0 {
            tracing::error!(run_id, "finalize_run: no such run, skipping");
        }
        Ok(())
    }

    /// Reconstruct a prior run: its answer plus the chunk context it cited,
    /// omitting any context whose chunk has since been deleted.
    pub async fn replay(&self, run_id: &str) -> Result<Option<ReplayRecord>, PkaError> {
        let run_row: Option<(String, String, Option<i64>)> =
            sqlx::query_as("SELECT question, mode, latency_ms FROM qa_runs WHERE id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PkaError::Ingestion(e.to_string()))?;
        let Some((question, mode, latency_ms)) = run_row else {
            return Ok(None);
        };

        let answer_row: Option<String> =
            sqlx::query_scalar("SELECT answer_json FROM qa_answers WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PkaError::Ingestion(e.to_string()))?;
        let Some(answer_json) = answer_row else {
            return Ok(None);
        };
        let answer: Answer = serde_json::from_str(&answer_json)
            .map_err(|e| PkaError::Ingestion(format!("stored answer is corrupt: {e}")))?;

        let rows: Vec<(i64, Option<i64>, Option<f64>, Option<f64>, Option<String>)> = sqlx::query_as(
            "SELECT rank, chunk_id, score_bm25, score_embed, rationale FROM qa_contexts WHERE run_id = ? ORDER BY rank",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PkaError::Ingestion(e.to_string()))?;

        let mut context = Vec::new();
        for (_, chunk_id, score_bm25, score_embed, rationale) in rows {
            let Some(chunk_id) = chunk_id else { continue };
            let chunk_row: Option<(i64, String, String, Option<i64>, Option<i64>, Option<i64>)> = sqlx::query_as(
                r#"
                SELECT c.document_id, d.path, c.text, c.start_line, c.end_line, c.page_no
                FROM chunks c JOIN documents d ON d.id = c.document_id
                WHERE c.id = ?
                "#,
            )
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PkaError::Ingestion(e.to_string()))?;
            let Some((document_id, path, text, start_line, end_line, page_no)) = chunk_row else {
                continue;
            };
            let citation = build_citation(&path, start_line, end_line, page_no);
            context.push(ContextSnippet {
                chunk_id,
                document_id,
                citation,
                rationale: rationale.unwrap_or_default(),
                content: text,
                score_bm25,
                score_embed,
            });
        }

        Ok(Some(ReplayRecord {
            run_id: run_id.to_string(),
            question,
            mode,
            latency_ms,
            answer,
            context,
        }))
    }

    /// List the most recent runs, newest first.
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<RunSummary>, PkaError> {
        let rows: Vec<(String, String, String, i64, Option<i64>, bool)> = sqlx::query_as(
            "SELECT id, question, mode, started_at, latency_ms, abstained FROM qa_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PkaError::Ingestion(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(run_id, question, mode, started_at, latency_ms, abstained)| RunSummary {
                run_id,
                question,
                mode,
                started_at: DateTime::<Utc>::from_timestamp(started_at, 0).unwrap_or_else(Utc::now),
                latency_ms,
                abstained,
            })
            .collect())
    }
}

fn compose_rationale(hit: &RetrievalHit) -> String {
    let mut parts = Vec::new();
    if let Some(bm25) = hit.score_bm25 {
        parts.push(format!("BM25={bm25:.3}"));
    }
    if let Some(embed) = hit.score_embed {
        parts.push(format!("Embed={embed:.3}"));
    } else if let Some(distance) = hit.distance {
        parts.push(format!("Dist={distance:.3}"));
    }
    if parts.is_empty() {
        "Relevant snippet".to_string()
    } else {
        parts.join(", ")
    }
}

fn build_citation(path: &str, start_line: Option<i64>, end_line: Option<i64>, page_no: Option<i64>) -> String {
    let name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();
    if let (Some(start), Some(end)) = (start_line, end_line) {
        return format!("{name}:L{start}-L{end}");
    }
    if let Some(page) = page_no {
        return format!("{name}:p.{page}");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE qa_runs (id TEXT PRIMARY KEY, question TEXT, mode TEXT, llm_version TEXT, \
             prompt_version TEXT, template_hash TEXT, started_at INTEGER, latency_ms INTEGER, abstained INTEGER DEFAULT 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE qa_contexts (id INTEGER PRIMARY KEY, run_id TEXT, chunk_id INTEGER, rank INTEGER, \
             score_bm25 REAL, score_embed REAL, score_rerank REAL, rationale TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("CREATE TABLE qa_answers (run_id TEXT PRIMARY KEY, answer_json TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE documents (id INTEGER PRIMARY KEY, path TEXT, title TEXT, type TEXT, \
             created_at INTEGER, updated_at INTEGER, confidentiality_tag TEXT, sha256 TEXT, size INTEGER, meta TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE chunks (id INTEGER PRIMARY KEY, document_id INTEGER, ordinal INTEGER, text TEXT, \
             start_line INTEGER, end_line INTEGER, page_no INTEGER, token_count INTEGER, embedding BLOB, meta TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn create_write_finalize_and_replay_roundtrip() {
        let pool = setup_pool().await;
        let store = RunStore::new(pool.clone());

        sqlx::query("INSERT INTO documents (id, path, title, type) VALUES (1, '/notes/a.md', 'A', 'md')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO chunks (id, document_id, ordinal, text, start_line, end_line) VALUES (1, 1, 1, 'hello world', 1, 2)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let run_id = store
            .create_run("what is this?", "synthesize", "llama3.1:8b", "assistant-v1", "hash123")
            .await
            .unwrap();

        let hit = RetrievalHit {
            chunk_id: 1,
            document_id: 1,
            path: "/notes/a.md".to_string(),
            title: "A".to_string(),
            text: "hello world".to_string(),
            start_line: Some(1),
            end_line: Some(2),
            page_no: None,
            token_count: None,
            score_bm25: Some(1.5),
            score_embed: None,
            distance: None,
            rank_bm25: Some(0),
            rank_embed: None,
        };
        store.write_contexts(&run_id, &[hit]).await.unwrap();

        let answer = Answer {
            abstain: false,
            answer: "It's a test.".to_string(),
            bullets: vec![],
            conflicts: vec![],
            sources: vec![],
        };
        store.write_answer(&run_id, &answer).await.unwrap();
        store.finalize_run(&run_id, 250, false).await.unwrap();

        let replay = store.replay(&run_id).await.unwrap().unwrap();
        assert_eq!(replay.question, "what is this?");
        assert_eq!(replay.context.len(), 1);
        assert_eq!(replay.context[0].citation, "a.md:L1-L2");

        let summaries = store.list_runs(10).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].latency_ms, Some(250));
    }

    #[tokio::test]
    async fn replay_unknown_run_returns_none() {
        let pool = setup_pool().await;
        let store = RunStore::new(pool);
        assert!(store.replay("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_unknown_run_is_non_fatal() {
        let pool = setup_pool().await;
        let store = RunStore::new(pool);
        assert!(store.finalize_run("nonexistent", 1, false).await.is_ok());
    }
}
