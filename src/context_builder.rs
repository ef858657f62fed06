//! `ContextBuilder` — normalize, clip, and cite retrieval hits into the
//! [`ContextSnippet`]s the synthesis prompt and API response share
//! (spec §4.7).
//!
//! Grounded on
//! `original_source/pka/app/services/retrieval/context_builder.py`.

use std::path::Path;

use crate::models::{ContextSnippet, RetrievalHit};

pub struct ContextBuilder {
    max_length: usize,
}

impl ContextBuilder {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn build(&self, hits: &[RetrievalHit]) -> Vec<ContextSnippet> {
        hits.iter()
            .filter_map(|hit| {
                let normalized = normalize_text(&hit.text);
                if normalized.is_empty() {
                    return None;
                }
                Some(ContextSnippet {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    citation: format_citation(hit),
                    rationale: compose_rationale(hit),
                    content: clip(&normalized, self.max_length),
                    score_bm25: hit.score_bm25,
                    score_embed: hit.score_embed,
                })
            })
            .collect()
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shorten `text` to at most `max_length` characters on a word boundary,
/// appending " ..." (matching `textwrap.shorten`'s placeholder).
fn clip(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let placeholder = " ...";
    let budget = max_length.saturating_sub(placeholder.len());
    let mut out = String::new();
    for word in text.split_whitespace() {
        let candidate_len = if out.is_empty() {
            word.chars().count()
        } else {
            out.chars().count() + 1 + word.chars().count()
        };
        if candidate_len > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(placeholder);
    out
}

fn format_citation(hit: &RetrievalHit) -> String {
    let name = Path::new(&hit.path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&hit.path)
        .to_string();

    let fragment = if let (Some(start), Some(end)) = (hit.start_line, hit.end_line) {
        if start > 0 && end > 0 {
            format!("L{start}-L{end}")
        } else {
            String::new()
        }
    } else if let Some(page) = hit.page_no {
        if page > 0 {
            format!("p.{page}")
        } else {
            String::new()
        }
    } else {
        String::new()
    };

    if fragment.is_empty() {
        name
    } else {
        format!("{name}:{fragment}")
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base_hit() -> RetrievalHit {
        RetrievalHit {
            chunk_id: 1,
            document_id: 1,
            path: "/notes/budget.md".to_string(),
            title: "Budget".to_string(),
            text: "  some   padded\n\ntext  here ".to_string(),
            start_line: Some(4),
            end_line: Some(9),
            page_no: None,
            token_count: Some(12),
            score_bm25: Some(1.234),
            score_embed: Some(0.987),
            distance: None,
            rank_bm25: Some(0),
            rank_embed: Some(1),
        }
    }

    #[test]
    fn normalizes_whitespace() {
        let builder = ContextBuilder::new(900);
        let snippets = builder.build(&[base_hit()]);
        assert_eq!(snippets[0].content, "some padded text here");
    }

    #[test]
    fn formats_line_range_citation() {
        let builder = ContextBuilder::new(900);
        let snippets = builder.build(&[base_hit()]);
        assert_eq!(snippets[0].citation, "budget.md:L4-L9");
    }

    #[test]
    fn formats_page_citation_when_no_lines() {
        let mut hit = base_hit();
        hit.start_line = None;
        hit.end_line = None;
        hit.page_no = Some(3);
        let builder = ContextBuilder::new(900);
        let snippets = builder.build(&[hit]);
        assert_eq!(snippets[0].citation, "budget.md:p.3");
    }

    #[test]
    fn clips_long_text_on_word_boundary() {
        let long_text = "word ".repeat(200);
        let mut hit = base_hit();
        hit.text = long_text;
        let builder = ContextBuilder::new(50);
        let snippets = builder.build(&[hit]);
        assert!(snippets[0].content.len() <= 50);
        assert!(snippets[0].content.ends_with(" ..."));
    }

    #[test]
    fn empty_text_is_skipped() {
        let mut hit = base_hit();
        hit.text = "   ".to_string();
        let builder = ContextBuilder::new(900);
        assert!(builder.build(&[hit]).is_empty());
    }

    #[test]
    fn rationale_prefers_bm25_and_embed_over_distance() {
        let hit = base_hit();
        let rationale = compose_rationale(&hit);
        assert_eq!(rationale, "BM25=1.234, Embed=0.987");
    }
}
