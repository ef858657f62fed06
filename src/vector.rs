//! `VectorIndex` — brute-force similarity search over chunk embeddings
//! (spec §4.3).
//!
//! There is no ANN structure: every chunk's embedding is scanned per query.
//! At the scale this system targets (a personal knowledge base, not a
//! corpus-scale deployment) a linear scan is fast enough and avoids the
//! correctness risk of an approximate index silently dropping the best
//! match.

use sqlx::SqlitePool;

use crate::embedding::{blob_to_vec, cosine_similarity, l2_distance};
use crate::error::PkaError;

/// Distance metric used to rank chunks against a query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    L2,
}

impl Metric {
    pub fn parse(s: &str) -> Result<Self, PkaError> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "l2" => Ok(Metric::L2),
            other => Err(PkaError::Config(format!("unknown vector metric: {other}"))),
        }
    }
}

/// One scored hit from [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: i64,
    /// Monotone increasing is better: cosine similarity, or negated L2
    /// distance, per spec §4.3's score-conversion note.
    pub score: f64,
}

pub struct VectorIndex {
    pool: SqlitePool,
    metric: Metric,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool, metric: Metric) -> Self {
        Self { pool, metric }
    }

    /// Score every chunk's embedding against `query_vector`, returning the
    /// top `limit` by score, descending.
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, PkaError> {
        if query_vector.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as("SELECT id, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PkaError::Ingestion(format!("failed to scan chunk embeddings: {e}")))?;

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|(chunk_id, blob)| {
                let embedding = blob_to_vec(&blob);
                let score = match self.metric {
                    Metric::Cosine => cosine_similarity(query_vector, &embedding) as f64,
                    Metric::L2 => -(l2_distance(query_vector, &embedding) as f64),
                };
                VectorHit { chunk_id, score }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_parse_roundtrip() {
        assert_eq!(Metric::parse("cosine").unwrap(), Metric::Cosine);
        assert_eq!(Metric::parse("l2").unwrap(), Metric::L2);
        assert!(Metric::parse("manhattan").is_err());
    }

    #[tokio::test]
    async fn search_orders_by_similarity_descending() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE chunks (id INTEGER PRIMARY KEY, document_id INTEGER, ordinal INTEGER, \
             text TEXT, start_line INTEGER, end_line INTEGER, page_no INTEGER, token_count INTEGER, \
             embedding BLOB, meta TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        for (id, vec) in [(1i64, vec![1.0f32, 0.0]), (2, vec![0.0, 1.0]), (3, vec![0.9, 0.1])] {
            let blob = crate::embedding::vec_to_blob(&vec);
            sqlx::query("INSERT INTO chunks (id, embedding) VALUES (?, ?)")
                .bind(id)
                .bind(blob)
                .execute(&pool)
                .await
                .unwrap();
        }

        let index = VectorIndex::new(pool, Metric::Cosine);
        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 1);
        assert_eq!(hits[1].chunk_id, 3);
    }

    #[tokio::test]
    async fn empty_query_vector_returns_empty_result() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE chunks (id INTEGER PRIMARY KEY, document_id INTEGER, ordinal INTEGER, \
             text TEXT, start_line INTEGER, end_line INTEGER, page_no INTEGER, token_count INTEGER, \
             embedding BLOB, meta TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let index = VectorIndex::new(pool, Metric::Cosine);
        let hits = index.search(&[], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
