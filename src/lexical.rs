//! `LexicalIndex` — durable BM25 full-text index over chunk text
//! (spec §4.2).
//!
//! Backed by `tantivy` rather than SQLite FTS5: the index lives in its own
//! directory (`config.lexical.path`), survives process restarts, and is
//! reloaded after every write so concurrent readers (the HTTP server) see
//! committed changes without restarting.

use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, FAST, INDEXED, STORED, TEXT, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::PkaError;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// One scored hit from [`LexicalIndex::search`].
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: i64,
    pub score: f32,
}

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    chunk_id_field: tantivy::schema::Field,
    title_field: tantivy::schema::Field,
    text_field: tantivy::schema::Field,
}

impl LexicalIndex {
    /// Open (or create) the index directory at `path`.
    pub fn open(path: &Path) -> Result<Self, PkaError> {
        std::fs::create_dir_all(path)
            .map_err(|e| PkaError::Config(format!("failed to create lexical index dir: {e}")))?;

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_i64_field("chunk_id", STORED | FAST | INDEXED);
        let title_field = schema_builder.add_text_field("title", TEXT);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let dir = tantivy::directory::MmapDirectory::open(path)
            .map_err(|e| PkaError::Config(format!("failed to open lexical index dir: {e}")))?;
        let index = Index::open_or_create(dir, schema)
            .map_err(|e| PkaError::Config(format!("failed to open tantivy index: {e}")))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| PkaError::Config(format!("failed to build tantivy reader: {e}")))?;

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| PkaError::Config(format!("failed to build tantivy writer: {e}")))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            chunk_id_field,
            title_field,
            text_field,
        })
    }

    /// Add one chunk's title and text to the index. Does not commit; call
    /// [`Self::commit`] after a batch.
    pub fn add_chunk(&self, chunk_id: i64, title: &str, text: &str) -> Result<(), PkaError> {
        let writer = self.writer.lock().expect("lexical index writer poisoned");
        writer
            .add_document(doc!(
                self.chunk_id_field => chunk_id,
                self.title_field => title,
                self.text_field => text,
            ))
            .map_err(|e| PkaError::Ingestion(format!("failed to add chunk to lexical index: {e}")))?;
        Ok(())
    }

    /// Remove every indexed chunk belonging to the given ids (used before
    /// re-adding a document's chunks on re-ingest, per spec §4.5).
    pub fn remove_chunks(&self, chunk_ids: &[i64]) -> Result<(), PkaError> {
        let writer = self.writer.lock().expect("lexical index writer poisoned");
        for &chunk_id in chunk_ids {
            let term = Term::from_field_i64(self.chunk_id_field, chunk_id);
            writer.delete_term(term);
        }
        Ok(())
    }

    /// Commit pending adds/removals and reload readers.
    pub fn commit(&self) -> Result<(), PkaError> {
        let mut writer = self.writer.lock().expect("lexical index writer poisoned");
        writer
            .commit()
            .map_err(|e| PkaError::Ingestion(format!("failed to commit lexical index: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| PkaError::Ingestion(format!("failed to reload lexical index reader: {e}")))?;
        Ok(())
    }

    /// Replace a document's chunks atomically from the lexical index's
    /// perspective: remove the old set, add the new set, commit once.
    pub fn bulk_replace(
        &self,
        removed_chunk_ids: &[i64],
        added: &[(i64, String, String)],
    ) -> Result<(), PkaError> {
        self.remove_chunks(removed_chunk_ids)?;
        for (chunk_id, title, text) in added {
            self.add_chunk(*chunk_id, title, text)?;
        }
        self.commit()
    }

    /// Search for the top `limit` chunks matching `query` against the
    /// `{title, content}` search fields (spec §4.2), ranked by BM25.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>, PkaError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.title_field, self.text_field]);
        let parsed = parser
            .parse_query(query)
            .map_err(|e| PkaError::Protocol(format!("invalid lexical query: {e}")))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| PkaError::Ingestion(format!("lexical search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| PkaError::Ingestion(format!("failed to fetch lexical doc: {e}")))?;
            if let Some(chunk_id) = retrieved
                .get_first(self.chunk_id_field)
                .and_then(|v| v.as_i64())
            {
                hits.push(LexicalHit { chunk_id, score });
            }
        }
        Ok(hits)
    }

    /// Drop every document from the index (used by `pka embed rebuild`).
    pub fn clear(&self) -> Result<(), PkaError> {
        let mut writer = self.writer.lock().expect("lexical index writer poisoned");
        writer
            .delete_all_documents()
            .map_err(|e| PkaError::Ingestion(format!("failed to clear lexical index: {e}")))?;
        writer
            .commit()
            .map_err(|e| PkaError::Ingestion(format!("failed to commit lexical index clear: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| PkaError::Ingestion(format!("failed to reload lexical index reader: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_commit_and_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        index
            .add_chunk(1, "Q3 Budget", "the quarterly budget review covers travel expenses")
            .unwrap();
        index
            .add_chunk(2, "Garden Notes", "notes on the garden irrigation schedule")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("budget travel", 5).unwrap();
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn search_matches_on_title_alone() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        index
            .add_chunk(1, "Quarterly Budget Review", "no matching words in the body")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("Quarterly", 5).unwrap();
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn remove_chunks_excludes_from_future_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        index.add_chunk(1, "Budget", "budget review").unwrap();
        index.commit().unwrap();
        index.bulk_replace(&[1], &[]).unwrap();

        let hits = index.search("budget", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        let hits = index.search("   ", 5).unwrap();
        assert!(hits.is_empty());
    }
}
