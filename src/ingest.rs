//! `IngestionCoordinator` — discover, load, hash, chunk, embed, persist
//! (spec §4.5).
//!
//! Each file is handled independently: a chunker or embedding failure is
//! recorded and the file is skipped, but the run continues. Relational
//! writes happen inside one transaction per document; the lexical index is
//! only updated strictly after that transaction commits, so a crash
//! between the two leaves the lexical index stale (re-ingest repairs it)
//! rather than the relational store inconsistent.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::chunk::{chunk_email, chunk_markdown, chunk_pdf, ChunkDraft};
use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingClient};
use crate::error::PkaError;
use crate::lexical::LexicalIndex;
use crate::models::DocumentType;

/// Outcome of one `ingest` invocation.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_ingested: u64,
    pub documents_unchanged: u64,
    pub documents_failed: u64,
    pub chunks_written: u64,
    pub errors: Vec<(PathBuf, String)>,
}

struct Discovered {
    path: PathBuf,
    kind: DocumentType,
}

/// Walk the three configured source directories for files of the matching
/// extension, deterministically sorted by path.
fn discover(config: &Config) -> Vec<Discovered> {
    let mut found = Vec::new();
    found.extend(discover_dir(&config.sources.notes_dir, "md", DocumentType::Md));
    found.extend(discover_dir(&config.sources.pdfs_dir, "pdf", DocumentType::Pdf));
    found.extend(discover_dir(&config.sources.emails_dir, "eml", DocumentType::Email));
    found
}

fn discover_dir(dir: &Path, extension: &str, kind: DocumentType) -> Vec<Discovered> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "source directory does not exist");
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths.into_iter().map(|path| Discovered { path, kind }).collect()
}

struct LoadedDocument {
    title: String,
    metadata: serde_json::Value,
    chunks: Vec<ChunkDraft>,
}

fn load_and_chunk(path: &Path, kind: DocumentType, config: &Config) -> Result<Option<LoadedDocument>, PkaError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();

    match kind {
        DocumentType::Md => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| PkaError::Ingestion(format!("failed to read {}: {e}", path.display())))?;
            let doc = chunk_markdown(
                &raw,
                &stem,
                config.chunking.md_max_tokens,
                config.chunking.md_overlap_ratio,
            )?;
            Ok(doc.map(|d| LoadedDocument {
                title: d.title,
                metadata: d.metadata,
                chunks: d.chunks,
            }))
        }
        DocumentType::Pdf => {
            let bytes = std::fs::read(path)
                .map_err(|e| PkaError::Ingestion(format!("failed to read {}: {e}", path.display())))?;
            let chunks = chunk_pdf(
                &bytes,
                config.chunking.pdf_max_tokens,
                config.chunking.pdf_overlap_tokens,
            )?;
            if chunks.is_empty() {
                return Ok(None);
            }
            let title = crate::chunk::titlecase_stem(&stem);
            let page_count = chunks.iter().filter_map(|c| c.page_no).max().unwrap_or(0);
            Ok(Some(LoadedDocument {
                title,
                metadata: serde_json::json!({"pages": page_count}),
                chunks,
            }))
        }
        DocumentType::Email => {
            let raw = std::fs::read(path)
                .map_err(|e| PkaError::Ingestion(format!("failed to read {}: {e}", path.display())))?;
            let doc = chunk_email(
                &raw,
                &stem,
                config.chunking.email_max_tokens,
                config.chunking.email_overlap_ratio,
            )?;
            Ok(doc.map(|d| LoadedDocument {
                title: d.title,
                metadata: d.metadata,
                chunks: d.chunks,
            }))
        }
    }
}

/// Ingest every discoverable file under the configured source directories.
pub async fn ingest_all(
    config: &Config,
    pool: &SqlitePool,
    lexical: &LexicalIndex,
    embedder: &EmbeddingClient,
) -> Result<IngestReport, PkaError> {
    let files = discover(config);
    let mut report = IngestReport::default();

    for file in files {
        match ingest_one(config, pool, lexical, embedder, &file.path, file.kind).await {
            Ok(Some(chunk_count)) => {
                report.documents_ingested += 1;
                report.chunks_written += chunk_count;
            }
            Ok(None) => {
                report.documents_unchanged += 1;
            }
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "failed to ingest file");
                report.documents_failed += 1;
                report.errors.push((file.path, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Ingest a single file. Returns `Ok(Some(chunk_count))` if (re)ingested,
/// `Ok(None)` if unchanged (sha256 matches the stored document), or an
/// error if chunking/embedding/persistence failed.
async fn ingest_one(
    config: &Config,
    pool: &SqlitePool,
    lexical: &LexicalIndex,
    embedder: &EmbeddingClient,
    path: &Path,
    kind: DocumentType,
) -> Result<Option<u64>, PkaError> {
    let abs_path = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string();

    let raw_bytes = std::fs::read(path)
        .map_err(|e| PkaError::Ingestion(format!("failed to read {}: {e}", path.display())))?;
    let sha256 = format!("{:x}", Sha256::digest(&raw_bytes));
    let size = raw_bytes.len() as i64;

    let existing_sha: Option<String> =
        sqlx::query_scalar("SELECT sha256 FROM documents WHERE path = ?")
            .bind(&abs_path)
            .fetch_optional(pool)
            .await
            .map_err(|e| PkaError::Ingestion(e.to_string()))?;

    if existing_sha.as_deref() == Some(sha256.as_str()) {
        return Ok(None);
    }

    let loaded = match load_and_chunk(path, kind, config)? {
        Some(loaded) => loaded,
        None => return Ok(None),
    };
    if loaded.chunks.is_empty() {
        return Ok(None);
    }

    let texts: Vec<String> = loaded.chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder.embed_texts(&texts).await?;
    if embeddings.len() != loaded.chunks.len() {
        return Err(PkaError::Ingestion(format!(
            "embedding count {} does not match chunk count {}",
            embeddings.len(),
            loaded.chunks.len()
        )));
    }

    let now = Utc::now().timestamp();
    let metadata_json = loaded.metadata.to_string();

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| PkaError::Ingestion(e.to_string()))?;

    let document_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (path, title, type, created_at, updated_at, sha256, size, meta)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            title = excluded.title,
            updated_at = excluded.updated_at,
            sha256 = excluded.sha256,
            size = excluded.size,
            meta = excluded.meta
        RETURNING id
        "#,
    )
    .bind(&abs_path)
    .bind(&loaded.title)
    .bind(kind.as_str())
    .bind(now)
    .bind(now)
    .bind(&sha256)
    .bind(size)
    .bind(&metadata_json)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| PkaError::Ingestion(e.to_string()))?;

    let removed_chunk_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| PkaError::Ingestion(e.to_string()))?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| PkaError::Ingestion(e.to_string()))?;

    let mut added_for_lexical: Vec<(i64, String, String)> = Vec::with_capacity(loaded.chunks.len());

    for (ordinal, (chunk, embedding)) in loaded.chunks.iter().zip(embeddings.iter()).enumerate() {
        let blob = vec_to_blob(embedding);
        let chunk_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO chunks
                (document_id, ordinal, text, start_line, end_line, page_no, token_count, embedding, meta)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, '{}')
            RETURNING id
            "#,
        )
        .bind(document_id)
        .bind((ordinal + 1) as i64)
        .bind(&chunk.text)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .bind(chunk.page_no)
        .bind(chunk.token_count)
        .bind(blob)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| PkaError::Ingestion(e.to_string()))?;

        added_for_lexical.push((chunk_id, loaded.title.clone(), chunk.text.clone()));
    }

    tx.commit().await.map_err(|e| PkaError::Ingestion(e.to_string()))?;

    lexical.bulk_replace(&removed_chunk_ids, &added_for_lexical)?;

    Ok(Some(added_for_lexical.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_dir_is_case_insensitive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.MD"), "# B").unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "nope").unwrap();

        let found = discover_dir(dir.path(), "md", DocumentType::Md);
        assert_eq!(found.len(), 2);
        assert!(found[0].path.file_name().unwrap().to_str().unwrap().starts_with('a'));
    }

    #[test]
    fn discover_dir_missing_directory_returns_empty() {
        let found = discover_dir(Path::new("/nonexistent/pka-test-dir"), "md", DocumentType::Md);
        assert!(found.is_empty());
    }
}
