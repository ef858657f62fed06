//! Configuration parsing and validation.
//!
//! PKA is configured via a TOML file (default: `config/pka.toml`). The
//! config defines the database path, per-source-type chunking parameters,
//! retrieval tuning, synthesis/template settings, the embedding and chat
//! daemon endpoints, the lexical index directory, the server bind address,
//! and the knowledge-base source directories.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub lexical: LexicalConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    /// Directory the tantivy index lives in. Created if missing.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Directory of Markdown notes, scanned for `**/*.md`.
    pub notes_dir: PathBuf,
    /// Directory of text-layer PDFs, scanned for `**/*.pdf`.
    pub pdfs_dir: PathBuf,
    /// Directory of exported `.eml` messages, scanned for `**/*.eml`.
    pub emails_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_md_max_tokens")]
    pub md_max_tokens: usize,
    #[serde(default = "default_md_overlap_ratio")]
    pub md_overlap_ratio: f64,
    #[serde(default = "default_pdf_max_tokens")]
    pub pdf_max_tokens: usize,
    #[serde(default = "default_pdf_overlap_tokens")]
    pub pdf_overlap_tokens: usize,
    #[serde(default = "default_email_max_tokens")]
    pub email_max_tokens: usize,
    #[serde(default = "default_email_overlap_ratio")]
    pub email_overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            md_max_tokens: default_md_max_tokens(),
            md_overlap_ratio: default_md_overlap_ratio(),
            pdf_max_tokens: default_pdf_max_tokens(),
            pdf_overlap_tokens: default_pdf_overlap_tokens(),
            email_max_tokens: default_email_max_tokens(),
            email_overlap_ratio: default_email_overlap_ratio(),
        }
    }
}

fn default_md_max_tokens() -> usize {
    800
}
fn default_md_overlap_ratio() -> f64 {
    0.15
}
fn default_pdf_max_tokens() -> usize {
    800
}
fn default_pdf_overlap_tokens() -> usize {
    120
}
fn default_email_max_tokens() -> usize {
    700
}
fn default_email_overlap_ratio() -> f64 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_bm25")]
    pub max_bm25: usize,
    #[serde(default = "default_max_vector")]
    pub max_vector: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_diversity_cap")]
    pub diversity_cap: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_context_max_length")]
    pub context_max_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_bm25: default_max_bm25(),
            max_vector: default_max_vector(),
            final_limit: default_final_limit(),
            diversity_cap: default_diversity_cap(),
            metric: default_metric(),
            context_max_length: default_context_max_length(),
        }
    }
}

fn default_max_bm25() -> usize {
    50
}
fn default_max_vector() -> usize {
    50
}
fn default_final_limit() -> usize {
    12
}
fn default_diversity_cap() -> usize {
    3
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_context_max_length() -> usize {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding RPC daemon (e.g. Ollama).
    pub base_url: String,
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    16
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_template_name")]
    pub template_name: String,
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default)]
    pub num_predict: Option<i64>,
    #[serde(default)]
    pub num_ctx: Option<i64>,
    #[serde(default)]
    pub keep_alive: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            model: default_chat_model(),
            template_name: default_template_name(),
            schema_path: None,
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            seed: default_seed(),
            num_predict: None,
            num_ctx: None,
            keep_alive: Some("30m".to_string()),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_chat_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_template_name() -> String {
    "assistant-v1".to_string()
}
fn default_max_retries() -> u32 {
    1
}
fn default_temperature() -> f64 {
    0.0
}
fn default_seed() -> i64 {
    42
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.diversity_cap < 1 {
        anyhow::bail!("retrieval.diversity_cap must be >= 1");
    }
    match config.retrieval.metric.as_str() {
        "cosine" | "l2" => {}
        other => anyhow::bail!("retrieval.metric must be 'cosine' or 'l2', got '{}'", other),
    }

    if config.chunking.md_max_tokens == 0
        || config.chunking.pdf_max_tokens == 0
        || config.chunking.email_max_tokens == 0
    {
        anyhow::bail!("chunking max_tokens settings must be > 0");
    }
    if !(0.0..1.0).contains(&config.chunking.md_overlap_ratio)
        || !(0.0..1.0).contains(&config.chunking.email_overlap_ratio)
    {
        anyhow::bail!("chunking overlap_ratio settings must be in [0.0, 1.0)");
    }

    match &config.synthesis.schema_path {
        Some(schema_path) if schema_path.exists() => {}
        Some(schema_path) => {
            anyhow::bail!(
                "synthesis.schema_path does not exist: {}",
                schema_path.display()
            );
        }
        None => {
            anyhow::bail!(
                "synthesis.schema_path must be set to a Draft-07 JSON schema file for the \
                 Answer contract (spec §6); see config/schemas/answer.schema.json"
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn minimal_config(schema_path: &Path) -> String {
        format!(
            r#"
        [db]
        path = "/tmp/pka.sqlite"
        [lexical]
        path = "/tmp/pka-index"
        [sources]
        notes_dir = "/tmp/notes"
        pdfs_dir = "/tmp/pdfs"
        emails_dir = "/tmp/emails"
        [embedding]
        base_url = "http://localhost:11434"
        model = "nomic-embed-text"
        dims = 768
        [synthesis]
        schema_path = "{}"
        [server]
        bind = "127.0.0.1:8080"
    "#,
            schema_path.display()
        )
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let schema = tempfile::NamedTempFile::new().unwrap();
        fs::write(schema.path(), "{}").unwrap();
        let file = write_config(&minimal_config(schema.path()));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.final_limit, 12);
        assert_eq!(config.retrieval.diversity_cap, 3);
        assert_eq!(config.chunking.pdf_overlap_tokens, 120);
        assert_eq!(config.synthesis.max_retries, 1);
    }

    #[test]
    fn rejects_missing_schema_path() {
        let contents = minimal_config(Path::new("/tmp/pka.sqlite")).replace(
            "[synthesis]\n        schema_path = \"/tmp/pka.sqlite\"\n        ",
            "",
        );
        let file = write_config(&contents);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_nonexistent_schema_path() {
        let contents = minimal_config(Path::new("/tmp/does-not-exist-answer-schema.json"));
        let file = write_config(&contents);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_invalid_metric() {
        let schema = tempfile::NamedTempFile::new().unwrap();
        fs::write(schema.path(), "{}").unwrap();
        let contents = minimal_config(schema.path()).replace(
            "[server]",
            "[retrieval]\nmetric = \"manhattan\"\n[server]",
        );
        let file = write_config(&contents);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_zero_final_limit() {
        let schema = tempfile::NamedTempFile::new().unwrap();
        fs::write(schema.path(), "{}").unwrap();
        let contents = minimal_config(schema.path()).replace(
            "[server]",
            "[retrieval]\nfinal_limit = 0\n[server]",
        );
        let file = write_config(&contents);
        assert!(load_config(file.path()).is_err());
    }
}
