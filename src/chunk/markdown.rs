//! Markdown chunker: frontmatter metadata, heading-bounded sections,
//! greedy token-budget windows with line-level overlap.
//!
//! Grounded on `original_source/pka/app/services/ingest/markdown.py`
//! (`_load_markdown`/`_resolve_title`/`_split_sections`/`_generate_chunks`).

use serde_json::Value as Json;

use super::{compute_overlap, count_tokens, titlecase_stem, ChunkDraft};
use crate::error::PkaError;

/// A Markdown document after frontmatter extraction and title resolution.
pub struct MarkdownDocument {
    pub title: String,
    pub metadata: Json,
    pub chunks: Vec<ChunkDraft>,
}

struct Section {
    start_line: i64,
    lines: Vec<String>,
}

/// `^#{1,2} some heading text$`, matching headings of depth 1 or 2.
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_end();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 2 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest[1..].trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse a document that may begin with a `---`-delimited YAML frontmatter
/// block, returning `(metadata, body)`.
fn parse_frontmatter(raw: &str) -> Result<(Json, String), PkaError> {
    let normalized = raw.replace("\r\n", "\n");
    if let Some(rest) = normalized.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let yaml_block = &rest[..end];
            let body = &rest[end + 5..];
            let metadata: Json = serde_yaml::from_str(yaml_block)
                .map_err(|e| PkaError::Ingestion(format!("invalid frontmatter YAML: {e}")))?;
            return Ok((metadata, body.to_string()));
        }
    }
    Ok((Json::Object(Default::default()), normalized))
}

fn resolve_title(metadata: &Json, content: &str, path_stem: &str) -> String {
    if let Some(title) = metadata.get("title").and_then(|v| v.as_str()) {
        let trimmed = title.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    for line in content.lines() {
        if let Some(text) = heading_text(line) {
            return text.to_string();
        }
    }
    titlecase_stem(path_stem)
}

fn split_sections(lines: &[&str], _default_title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current_lines: Vec<String> = Vec::new();
    let mut current_start: i64 = 1;

    for (index, &line) in lines.iter().enumerate() {
        let line_no = (index + 1) as i64;
        if let Some(_text) = heading_text(line) {
            if !current_lines.is_empty() {
                sections.push(Section {
                    start_line: current_start,
                    lines: std::mem::take(&mut current_lines),
                });
            }
            current_start = line_no;
            current_lines.push(line.to_string());
        } else {
            current_lines.push(line.to_string());
        }
    }
    if !current_lines.is_empty() {
        sections.push(Section {
            start_line: current_start,
            lines: current_lines,
        });
    }
    sections
}

fn generate_chunks(sections: &[Section], max_tokens: usize, overlap_ratio: f64) -> Vec<ChunkDraft> {
    let max_tokens = max_tokens as i64;
    let overlap_tokens = (max_tokens as f64 * overlap_ratio).floor().max(1.0) as i64;
    let mut chunks = Vec::new();

    for section in sections {
        let tokens_per_line: Vec<i64> = section.lines.iter().map(|l| count_tokens(l)).collect();
        let total_lines = section.lines.len();
        let mut cursor = 0usize;

        while cursor < total_lines {
            let mut token_sum = 0i64;
            let mut end_index = cursor;
            while end_index < total_lines && token_sum < max_tokens {
                token_sum += tokens_per_line[end_index];
                end_index += 1;
            }

            let chunk_lines: Vec<&str> = section.lines[cursor..end_index]
                .iter()
                .map(|l| l.trim_end())
                .filter(|l| !l.trim().is_empty())
                .collect();

            if chunk_lines.is_empty() {
                cursor = end_index;
                continue;
            }

            let text = chunk_lines.join("\n").trim().to_string();
            let start_line = section.start_line + cursor as i64;
            let end_line = section.start_line + end_index as i64 - 1;
            chunks.push(ChunkDraft {
                text,
                start_line: Some(start_line),
                end_line: Some(end_line),
                page_no: None,
                token_count: token_sum,
            });

            if end_index >= total_lines {
                break;
            }

            let overlap_lines = compute_overlap(&tokens_per_line[cursor..end_index], overlap_tokens);
            let next_cursor = end_index.saturating_sub(overlap_lines);
            cursor = (cursor + 1).max(next_cursor);
        }
    }

    chunks
}

/// Chunk a Markdown file's raw bytes (decoded as UTF-8) into sections and
/// token-budget windows, resolving title and frontmatter metadata.
pub fn chunk_markdown(
    raw: &str,
    path_stem: &str,
    max_tokens: usize,
    overlap_ratio: f64,
) -> Result<Option<MarkdownDocument>, PkaError> {
    let (metadata, body) = parse_frontmatter(raw)?;
    let content = body.trim();
    if content.is_empty() {
        return Ok(None);
    }

    let title = resolve_title(&metadata, content, path_stem);
    let lines: Vec<&str> = content.lines().collect();
    let sections = split_sections(&lines, &title);
    let chunks = generate_chunks(&sections, max_tokens, overlap_ratio);

    if chunks.is_empty() {
        return Ok(None);
    }

    Ok(Some(MarkdownDocument {
        title,
        metadata,
        chunks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_and_title() {
        let raw = "---\ntitle: Planning Notes\nconfidentiality: private\n---\n# Planning Notes\n\nSome body text here about the roadmap.\n";
        let doc = chunk_markdown(raw, "planning_notes", 800, 0.15).unwrap().unwrap();
        assert_eq!(doc.title, "Planning Notes");
        assert_eq!(doc.metadata.get("confidentiality").unwrap(), "private");
        assert_eq!(doc.chunks.len(), 1);
    }

    #[test]
    fn falls_back_to_first_heading_when_no_frontmatter_title() {
        let raw = "# My Heading\n\nbody text\n";
        let doc = chunk_markdown(raw, "fallback", 800, 0.15).unwrap().unwrap();
        assert_eq!(doc.title, "My Heading");
    }

    #[test]
    fn falls_back_to_path_stem_when_no_heading() {
        let raw = "just plain body text with no heading at all\n";
        let doc = chunk_markdown(raw, "my_notes", 800, 0.15).unwrap().unwrap();
        assert_eq!(doc.title, "My Notes");
    }

    #[test]
    fn empty_body_yields_no_document() {
        let raw = "---\ntitle: Empty\n---\n   \n";
        assert!(chunk_markdown(raw, "empty", 800, 0.15).unwrap().is_none());
    }

    #[test]
    fn splits_long_sections_with_overlap() {
        let mut body = String::from("# Long Section\n\n");
        for i in 0..200 {
            body.push_str(&format!("line number {i} with some extra words to pad it out\n"));
        }
        let doc = chunk_markdown(&body, "long", 50, 0.2).unwrap().unwrap();
        assert!(doc.chunks.len() > 1);
        // forward progress: every chunk's start line strictly increases
        let mut last_start = -1i64;
        for chunk in &doc.chunks {
            let start = chunk.start_line.unwrap();
            assert!(start > last_start);
            last_start = start;
        }
    }
}
