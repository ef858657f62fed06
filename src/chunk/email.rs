//! Email chunker: RFC-822 parsing, quote stripping, paragraph windows.
//!
//! Grounded on `original_source/pka/app/services/ingest/email.py`
//! (`_extract_body`/`_strip_quotes`/`_chunk_text`).

use mail_parser::MessageParser;
use once_cell_replacement::LazyRegex;
use serde_json::{json, Value as Json};

use super::{compute_overlap, count_tokens, titlecase_stem, ChunkDraft};
use crate::error::PkaError;

/// A parsed `.eml` message ready for chunking.
pub struct EmailDocument {
    pub title: String,
    pub metadata: Json,
    pub chunks: Vec<ChunkDraft>,
}

mod once_cell_replacement {
    //! A tiny lazily-compiled-once pattern matcher, avoiding a dependency
    //! on `regex` for a single fixed pattern (`^On .*wrote:$`, case
    //! insensitive).
    pub struct LazyRegex;

    impl LazyRegex {
        pub fn matches_quote_header(line: &str) -> bool {
            let lower = line.to_ascii_lowercase();
            lower.starts_with("on ") && lower.ends_with("wrote:")
        }
    }
}

fn extract_body(message: &mail_parser::Message) -> String {
    let bodies: Vec<String> = message
        .text_bodies()
        .map(|part| part.to_string())
        .collect();
    if !bodies.is_empty() {
        return bodies.join("\n");
    }
    message
        .body_text(0)
        .map(|cow| cow.to_string())
        .unwrap_or_default()
}

fn strip_quotes(body: &str) -> String {
    let mut cleaned = Vec::new();
    let mut skip_block = false;
    for line in body.lines() {
        let stripped = line.trim();
        if stripped.starts_with('>') || LazyRegex::matches_quote_header(stripped) {
            skip_block = true;
        }
        if skip_block && stripped.is_empty() {
            skip_block = false;
            continue;
        }
        if skip_block {
            continue;
        }
        cleaned.push(line);
    }
    cleaned.join("\n").trim().to_string()
}

fn chunk_body(body: &str, max_tokens: usize, overlap_ratio: f64) -> Vec<ChunkDraft> {
    let max_tokens = max_tokens as i64;
    let overlap_tokens = ((max_tokens as f64 * overlap_ratio) as i64).max(1);

    let paragraphs: Vec<&str> = body
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    let token_counts: Vec<i64> = paragraphs.iter().map(|p| count_tokens(p)).collect();
    let total = paragraphs.len();
    let mut cursor = 0usize;
    let mut chunks = Vec::new();

    while cursor < total {
        let mut token_sum = 0i64;
        let mut end = cursor;
        while end < total && token_sum < max_tokens {
            token_sum += token_counts[end];
            end += 1;
        }

        let chunk_text = paragraphs[cursor..end].join("\n\n").trim().to_string();
        if !chunk_text.is_empty() {
            chunks.push(ChunkDraft {
                text: chunk_text.clone(),
                start_line: None,
                end_line: None,
                page_no: None,
                token_count: count_tokens(&chunk_text),
            });
        }

        if end >= total {
            break;
        }
        let overlap_lines = compute_overlap(&token_counts[cursor..end], overlap_tokens);
        let next_cursor = end.saturating_sub(overlap_lines);
        cursor = (cursor + 1).max(next_cursor);
    }

    chunks
}

fn address_summary(addr: Option<&mail_parser::Address>) -> Option<String> {
    let addr = addr?;
    let parts: Vec<String> = addr
        .iter()
        .filter_map(|a| a.address().map(|s| s.to_string()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Parse and chunk a `.eml` message's raw bytes.
pub fn chunk_email(
    raw: &[u8],
    path_stem: &str,
    max_tokens: usize,
    overlap_ratio: f64,
) -> Result<Option<EmailDocument>, PkaError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| PkaError::Ingestion("failed to parse email message".to_string()))?;

    let subject = message.subject().map(|s| s.to_string());
    let date = message.date().map(|d| d.to_string());
    let from = address_summary(message.from());
    let to = address_summary(message.to());
    let cc = address_summary(message.cc());

    let body = extract_body(&message);
    if body.trim().is_empty() {
        return Ok(None);
    }

    let cleaned_body = strip_quotes(&body);
    let chunks = chunk_body(&cleaned_body, max_tokens, overlap_ratio);
    if chunks.is_empty() {
        return Ok(None);
    }

    let title = subject
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| titlecase_stem(path_stem));

    let mut metadata = json!({});
    if let Some(from) = from {
        metadata["from"] = json!(from);
    }
    if let Some(to) = to {
        metadata["to"] = json!(to);
    }
    if let Some(cc) = cc {
        metadata["cc"] = json!(cc);
    }
    if let Some(subject) = &subject {
        metadata["subject"] = json!(subject);
    }
    if let Some(date) = &date {
        metadata["date"] = json!(date);
    }

    Ok(Some(EmailDocument {
        title,
        metadata,
        chunks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quoted_reply_blocks() {
        let body = "Here is my reply.\n\nOn Tuesday, Alice wrote:\n> original message\n> more quoted text\n\nThanks!";
        let cleaned = strip_quotes(body);
        assert!(!cleaned.contains("original message"));
        assert!(cleaned.contains("Here is my reply."));
        assert!(cleaned.contains("Thanks!"));
    }

    #[test]
    fn chunk_body_respects_token_budget() {
        let body: String = (0..30)
            .map(|i| format!("paragraph {i} with extra padding words here"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_body(&body, 20, 0.2);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn quote_header_matcher_is_case_insensitive() {
        assert!(LazyRegex::matches_quote_header("on monday bob wrote:"));
        assert!(LazyRegex::matches_quote_header("On Mon, 1 Jan 2024, Bob Wrote:".to_lowercase().as_str()));
        assert!(!LazyRegex::matches_quote_header("this is a normal line"));
    }

    #[test]
    fn falls_back_to_titleized_path_stem_when_no_subject() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\n\r\nNo subject here, just a body.\r\n";
        let doc = chunk_email(raw, "weekly_standup", 800, 0.15).unwrap().unwrap();
        assert_eq!(doc.title, "Weekly Standup");
    }
}
