//! `EmbeddingClient` — batched, retried client for the embedding RPC
//! daemon (spec §4.1), plus the vector utilities shared by `VectorIndex`.
//!
//! # Retry strategy
//!
//! Each batch is retried with exponential backoff (base 1s, capped at 4s)
//! for up to 3 attempts before the batch's error is surfaced. This mirrors
//! the embedding service's tenacity policy in the original implementation
//! (`wait_exponential(multiplier=1, min=1, max=4)`, `stop_after_attempt(3)`).

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::PkaError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 4;

/// Client for the embedding RPC daemon (e.g. Ollama's `/api/embed`).
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, PkaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PkaError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
        })
    }

    /// Embed a batch of texts, preserving input order (spec §4.1).
    ///
    /// Texts are split into groups of `batch_size`; each batch is one RPC,
    /// retried independently.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PkaError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let mut vectors = self.embed_batch_with_retry(batch).await?;
            out.append(&mut vectors);
        }
        Ok(out)
    }

    /// Embed a single query text; must return exactly one vector.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, PkaError> {
        let mut vectors = self.embed_texts(&[query.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(PkaError::Protocol(format!(
                "expected exactly one embedding for a query, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }

    async fn embed_batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, PkaError> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_secs(
                    (BACKOFF_BASE_SECS << (attempt - 1).min(2)).min(BACKOFF_MAX_SECS),
                );
                tokio::time::sleep(delay).await;
            }
            match self.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embedding batch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PkaError::Transport("embedding batch failed".to_string())))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, PkaError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PkaError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PkaError::Transport(format!(
                "embedding RPC returned {status}: {text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PkaError::Protocol(format!("invalid embedding response JSON: {e}")))?;

        let vectors = parse_embed_response(&json, batch.len())?;

        if vectors.len() != batch.len() {
            return Err(PkaError::Protocol(format!(
                "embedding count mismatch: requested {}, received {}",
                batch.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.dims {
                return Err(PkaError::Protocol(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dims,
                    vector.len()
                )));
            }
        }

        Ok(vectors)
    }
}

/// Parse one of the three accepted embedding RPC response shapes
/// (spec §6): `{embeddings: [[float]]}`, `{embedding: [float]}` (valid
/// only for a single-text request), `{data: [[float] | {embedding}]}`.
fn parse_embed_response(
    json: &serde_json::Value,
    requested: usize,
) -> Result<Vec<Vec<f32>>, PkaError> {
    if let Some(embeddings) = json.get("embeddings").and_then(|v| v.as_array()) {
        return embeddings
            .iter()
            .map(|v| {
                v.as_array()
                    .ok_or_else(|| {
                        PkaError::Protocol("embedding entry was not an array".to_string())
                    })
                    .and_then(|arr| parse_float_array(arr))
            })
            .collect();
    }

    if let Some(embedding) = json.get("embedding").and_then(|v| v.as_array()) {
        if requested != 1 {
            return Err(PkaError::Protocol(
                "embedding response used the single-vector shape for a multi-text request"
                    .to_string(),
            ));
        }
        return Ok(vec![parse_float_array(embedding)?]);
    }

    if let Some(data) = json.get("data").and_then(|v| v.as_array()) {
        return data
            .iter()
            .map(|item| {
                if let Some(arr) = item.as_array() {
                    parse_float_array(arr)
                } else if let Some(arr) = item.get("embedding").and_then(|v| v.as_array()) {
                    parse_float_array(arr)
                } else {
                    Err(PkaError::Protocol(
                        "embedding response 'data' entry was neither a list nor {embedding: [..]}"
                            .to_string(),
                    ))
                }
            })
            .collect();
    }

    Err(PkaError::Protocol(
        "embedding response missing embeddings/embedding/data".to_string(),
    ))
}

fn parse_float_array(values: &[serde_json::Value]) -> Result<Vec<f32>, PkaError> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                PkaError::Protocol("non-numeric value in embedding vector".to_string())
            })
        })
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes) for SQLite
/// `embedding` column storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two embedding vectors, in `[-1.0, 1.0]`.
/// Returns `0.0` for empty vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Squared Euclidean (L2) distance between two embedding vectors. Returns
/// `f32::MAX` for mismatched lengths so such pairs sort last.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn l2_identical_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(l2_distance(&v, &v), 0.0);
    }

    #[test]
    fn parses_embeddings_shape() {
        let json = serde_json::json!({"embeddings": [[1.0, 2.0], [3.0, 4.0]]});
        let vectors = parse_embed_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn parses_embedding_singular_shape() {
        let json = serde_json::json!({"embedding": [1.0, 2.0, 3.0]});
        let vectors = parse_embed_response(&json, 1).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn parses_data_shape_with_raw_lists() {
        let json = serde_json::json!({"data": [[1.0], [2.0]]});
        let vectors = parse_embed_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn parses_data_shape_with_embedding_objects() {
        let json = serde_json::json!({"data": [{"embedding": [1.0]}, {"embedding": [2.0]}]});
        let vectors = parse_embed_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn rejects_missing_shape() {
        let json = serde_json::json!({"nonsense": true});
        assert!(parse_embed_response(&json, 1).is_err());
    }
}
