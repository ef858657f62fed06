//! `RetrievalOrchestrator` — hybrid BM25 + vector retrieval with rank-order
//! fusion and a per-document diversity cap (spec §4.6).
//!
//! Unlike the teacher's `search.rs`, which blends normalized BM25/vector
//! scores with a weighted min-max formula, fusion here is rank-order based:
//! every BM25 hit (in BM25 rank order) precedes every vector-only hit (in
//! vector rank order), with both scores preserved on the merged result for
//! the rationale string. This mirrors
//! `original_source/pka/app/services/retrieval/orchestrator.py` exactly.

use std::collections::{HashMap, HashSet};

use sqlx::SqlitePool;

use crate::embedding::EmbeddingClient;
use crate::error::PkaError;
use crate::lexical::LexicalIndex;
use crate::models::RetrievalHit;
use crate::vector::VectorIndex;

pub struct RetrievalOrchestrator {
    pool: SqlitePool,
    max_bm25: usize,
    max_vector: usize,
    final_limit: usize,
    diversity_cap: usize,
}

impl RetrievalOrchestrator {
    pub fn new(
        pool: SqlitePool,
        max_bm25: usize,
        max_vector: usize,
        final_limit: usize,
        diversity_cap: usize,
    ) -> Self {
        Self {
            pool,
            max_bm25,
            max_vector,
            final_limit,
            diversity_cap,
        }
    }

    /// Retrieve the top context chunks for `question`, applying rank-order
    /// fusion of lexical and vector hits followed by a per-document
    /// diversity cap. Returns an empty list for a blank question.
    pub async fn retrieve(
        &self,
        question: &str,
        embedder: &EmbeddingClient,
        lexical: &LexicalIndex,
        vector: &VectorIndex,
    ) -> Result<Vec<RetrievalHit>, PkaError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = embedder.embed_query(question).await?;
        let bm25_hits = lexical.search(question, self.max_bm25)?;
        let vector_hits = vector.search(&query_vector, self.max_vector).await?;

        let bm25_ids: HashSet<i64> = bm25_hits.iter().map(|h| h.chunk_id).collect();
        let vector_ids: HashSet<i64> = vector_hits.iter().map(|h| h.chunk_id).collect();
        let mut all_ids: Vec<i64> = Vec::new();
        for id in &bm25_ids {
            all_ids.push(*id);
        }
        for id in &vector_ids {
            if !bm25_ids.contains(id) {
                all_ids.push(*id);
            }
        }

        let rows = fetch_chunk_rows(&self.pool, &all_ids).await?;

        let mut merged: HashMap<i64, RetrievalHit> = HashMap::new();
        for (chunk_id, row) in rows {
            merged.insert(chunk_id, row);
        }

        for (rank, hit) in bm25_hits.iter().enumerate() {
            if let Some(result) = merged.get_mut(&hit.chunk_id) {
                result.score_bm25 = Some(hit.score as f64);
                result.rank_bm25 = Some(rank);
            }
        }
        for (rank, hit) in vector_hits.iter().enumerate() {
            if let Some(result) = merged.get_mut(&hit.chunk_id) {
                result.score_embed = Some(hit.score);
                result.rank_embed = Some(rank);
            }
        }

        let mut ordered_ids: Vec<i64> = Vec::new();
        let mut seen = HashSet::new();
        for hit in &bm25_hits {
            if seen.insert(hit.chunk_id) {
                ordered_ids.push(hit.chunk_id);
            }
        }
        for hit in &vector_hits {
            if seen.insert(hit.chunk_id) {
                ordered_ids.push(hit.chunk_id);
            }
        }

        let mut selected = Vec::new();
        let mut doc_counts: HashMap<i64, usize> = HashMap::new();
        for chunk_id in ordered_ids {
            let Some(result) = merged.get(&chunk_id) else { continue };
            let count = doc_counts.entry(result.document_id).or_insert(0);
            if *count >= self.diversity_cap {
                continue;
            }
            selected.push(result.clone());
            *count += 1;
            if selected.len() >= self.final_limit {
                break;
            }
        }

        Ok(selected)
    }
}

async fn fetch_chunk_rows(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<(i64, RetrievalHit)>, PkaError> {
    let mut out = Vec::with_capacity(ids.len());
    for &chunk_id in ids {
        let row: Option<(i64, i64, String, String, String, Option<i64>, Option<i64>, Option<i64>, Option<i64>)> =
            sqlx::query_as(
                r#"
                SELECT c.id, c.document_id, d.path, d.title, c.text, c.start_line, c.end_line, c.page_no, c.token_count
                FROM chunks c
                JOIN documents d ON d.id = c.document_id
                WHERE c.id = ?
                "#,
            )
            .bind(chunk_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| PkaError::Ingestion(format!("failed to fetch chunk {chunk_id}: {e}")))?;

        if let Some((id, document_id, path, title, text, start_line, end_line, page_no, token_count)) = row {
            out.push((
                id,
                RetrievalHit {
                    chunk_id: id,
                    document_id,
                    path,
                    title,
                    text,
                    start_line,
                    end_line,
                    page_no,
                    token_count,
                    score_bm25: None,
                    score_embed: None,
                    distance: None,
                    rank_bm25: None,
                    rank_embed: None,
                },
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: i64, document_id: i64) -> RetrievalHit {
        RetrievalHit {
            chunk_id,
            document_id,
            path: "x.md".to_string(),
            title: "X".to_string(),
            text: "text".to_string(),
            start_line: None,
            end_line: None,
            page_no: None,
            token_count: None,
            score_bm25: None,
            score_embed: None,
            distance: None,
            rank_bm25: None,
            rank_embed: None,
        }
    }

    #[test]
    fn diversity_cap_limits_per_document_selection() {
        let merged: HashMap<i64, RetrievalHit> = [
            (1, hit(1, 10)),
            (2, hit(2, 10)),
            (3, hit(3, 10)),
            (4, hit(4, 20)),
        ]
        .into_iter()
        .collect();
        let ordered_ids = vec![1i64, 2, 3, 4];
        let diversity_cap = 2usize;
        let final_limit = 10usize;

        let mut selected = Vec::new();
        let mut doc_counts: HashMap<i64, usize> = HashMap::new();
        for chunk_id in ordered_ids {
            let result = merged.get(&chunk_id).unwrap();
            let count = doc_counts.entry(result.document_id).or_insert(0);
            if *count >= diversity_cap {
                continue;
            }
            selected.push(result.chunk_id);
            *count += 1;
            if selected.len() >= final_limit {
                break;
            }
        }

        assert_eq!(selected, vec![1, 2, 4]);
    }
}
