//! PDF chunker: per-page paragraph packing with token-budget windows.
//!
//! `pdf-extract` exposes only whole-document text, with a form-feed
//! (`\x0c`) between pages. Page boundaries are recovered by splitting on
//! that character before paragraph packing runs per page — see
//! `DESIGN.md`'s Open Question decision on PDF page boundaries. Blank
//! pages are kept in the page list (not dropped) so that page numbers
//! assigned during chunking stay aligned with the source PDF; a blank
//! page simply contributes zero chunks.
//!
//! Grounded on `original_source/pka/app/services/ingest/pdf.py`
//! (`_extract_pages`/`_chunk_page`).

use super::{compute_overlap, count_tokens, ChunkDraft};
use crate::error::PkaError;

/// Extract whole-document PDF text and split it into per-page strings.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, PkaError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PkaError::Ingestion(format!("failed to extract PDF text: {e}")))?;

    Ok(text.split('\x0c').map(|page| page.trim().to_string()).collect())
}

fn chunk_page(page_no: i64, text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<ChunkDraft> {
    let max_tokens = max_tokens as i64;
    let overlap_tokens = overlap_tokens as i64;

    let mut paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        paragraphs.push(trimmed);
    }

    let token_counts: Vec<i64> = paragraphs.iter().map(|p| count_tokens(p)).collect();
    let total = paragraphs.len();
    let mut cursor = 0usize;
    let mut chunks = Vec::new();

    while cursor < total {
        let mut token_sum = 0i64;
        let mut end = cursor;
        // Always include at least one paragraph, even if it alone exceeds the budget.
        while end < total && (token_sum + token_counts[end] <= max_tokens || end == cursor) {
            token_sum += token_counts[end];
            end += 1;
        }

        let chunk_text = paragraphs[cursor..end].join("\n\n").trim().to_string();
        if !chunk_text.is_empty() {
            let actual_tokens = count_tokens(&chunk_text);
            chunks.push(ChunkDraft {
                text: chunk_text,
                start_line: None,
                end_line: None,
                page_no: Some(page_no),
                token_count: token_sum.max(actual_tokens),
            });
        }

        if end >= total {
            break;
        }
        let overlap = compute_overlap(&token_counts[cursor..end], overlap_tokens);
        let next_cursor = end.saturating_sub(overlap);
        cursor = (cursor + 1).max(next_cursor);
    }

    chunks
}

/// Chunk a PDF's extracted pages, numbering pages from 1.
pub fn chunk_pdf(bytes: &[u8], max_tokens: usize, overlap_tokens: usize) -> Result<Vec<ChunkDraft>, PkaError> {
    let pages = extract_pages(bytes)?;
    let mut chunks = Vec::new();
    for (index, page_text) in pages.iter().enumerate() {
        let page_no = (index + 1) as i64;
        chunks.extend(chunk_page(page_no, page_text, max_tokens, overlap_tokens));
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_within_budget() {
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let chunks = chunk_page(1, text, 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_no, Some(1));
    }

    #[test]
    fn splits_when_budget_exceeded() {
        let paragraphs: Vec<String> = (0..20)
            .map(|i| format!("paragraph {i} with several words padding it out nicely"))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_page(1, &text, 30, 5);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn oversized_single_paragraph_is_not_dropped() {
        let huge = "word ".repeat(500);
        let chunks = chunk_page(1, &huge, 10, 2);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn whole_page_fallback_when_no_blank_lines() {
        let text = "a single run-on paragraph with no double newlines anywhere in it";
        let chunks = chunk_page(1, text, 100, 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn extract_pages_keeps_blank_pages_so_numbering_stays_aligned() {
        let text = "page one text\x0c\x0cpage three text";
        let pages: Vec<String> = text.split('\x0c').map(|p| p.trim().to_string()).collect();
        assert_eq!(pages.len(), 3);
        assert!(pages[1].is_empty());

        let mut chunks = Vec::new();
        for (index, page_text) in pages.iter().enumerate() {
            let page_no = (index + 1) as i64;
            chunks.extend(chunk_page(page_no, page_text, 100, 10));
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_no, Some(1));
        assert_eq!(chunks[1].page_no, Some(3));
    }
}
