//! `SynthesisEngine` — deterministic, cite-or-abstain chat synthesis
//! (spec §4.7, §4.8).
//!
//! Grounded on `original_source/pka/app/services/synth/llama_local.py`
//! (`ChatService`): schema defaults are filled in BEFORE Draft-07
//! validation runs, validation failures trigger a bounded correction-retry
//! loop (the offending response plus a correction instruction are appended
//! to the conversation and resent), and transport/protocol failures fail
//! fast without retry.

use std::path::Path;
use std::time::Duration;

use jsonschema::JSONSchema;
use serde_json::Value as Json;

use crate::config::SynthesisConfig;
use crate::error::PkaError;
use crate::models::{Answer, ContextSnippet};
use crate::templates::PromptTemplateRegistry;

const SYSTEM_PROMPT: &str = "You are the Personal Knowledge Analyst. Use ONLY the provided context snippets.\n\
- If the snippets do not fully answer the question, you MUST abstain with actionable guidance.\n\
- Every claim must cite sources; provide citations using the supplied identifiers.\n\
- Respond with JSON only. No prose, no markdown, no commentary.";

pub struct SynthesisEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    seed: i64,
    num_predict: Option<i64>,
    num_ctx: Option<i64>,
    keep_alive: Option<String>,
    max_retries: u32,
    templates: PromptTemplateRegistry,
    template_name: String,
    schema: Json,
    compiled_schema: JSONSchema,
    schema_text: String,
}

impl SynthesisEngine {
    pub fn new(config: &SynthesisConfig) -> Result<Self, PkaError> {
        let schema_path = config
            .schema_path
            .as_deref()
            .ok_or_else(|| PkaError::Config("synthesis.schema_path is not configured".to_string()))?;
        let (schema, schema_text) = load_schema(schema_path)?;
        let compiled_schema = JSONSchema::compile(&schema)
            .map_err(|e| PkaError::Config(format!("invalid answer schema: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PkaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            seed: config.seed,
            num_predict: config.num_predict,
            num_ctx: config.num_ctx,
            keep_alive: config.keep_alive.clone(),
            max_retries: config.max_retries,
            templates: PromptTemplateRegistry::with_defaults(),
            template_name: config.template_name.clone(),
            schema,
            compiled_schema,
            schema_text,
        })
    }

    /// Generate a cite-or-abstain answer for `question` given the already
    /// retrieved and formatted `snippets`.
    pub async fn generate(
        &self,
        question: &str,
        snippets: &[ContextSnippet],
        mode: &str,
    ) -> Result<Answer, PkaError> {
        let template = self.templates.get(&self.template_name)?;
        let context_block = format_context(snippets);
        let user_prompt = template.render(&[
            ("question", question.trim()),
            ("context", &context_block),
            ("schema_json", &self.schema_text),
            ("mode", mode),
        ]);

        let mut messages = vec![
            json_message("system", SYSTEM_PROMPT),
            json_message("user", &user_prompt),
        ];

        self.invoke_with_retries(&mut messages).await
    }

    async fn invoke_with_retries(&self, messages: &mut Vec<Json>) -> Result<Answer, PkaError> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.invoke(messages).await {
                Ok(answer) => return Ok(answer),
                Err(PkaError::Validation(message)) => {
                    tracing::debug!(attempt, %message, "synthesis validation failure");
                    let correction = format!(
                        "The previous response was invalid: {message}\nRespond again with strictly valid JSON that satisfies the schema."
                    );
                    messages.push(json_message("user", &correction));
                    last_err = Some(PkaError::Validation(message));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| PkaError::Validation("synthesis retries exhausted".to_string())))
    }

    async fn invoke(&self, messages: &[Json]) -> Result<Answer, PkaError> {
        let mut options = serde_json::json!({
            "temperature": self.temperature,
            "seed": self.seed,
        });
        if let Some(num_predict) = self.num_predict {
            options["num_predict"] = serde_json::json!(num_predict);
        }
        if let Some(num_ctx) = self.num_ctx {
            options["num_ctx"] = serde_json::json!(num_ctx);
        }

        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });
        if let Some(keep_alive) = &self.keep_alive {
            payload["keep_alive"] = serde_json::json!(keep_alive);
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PkaError::Transport(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PkaError::Transport(format!("chat RPC returned {status}: {text}")));
        }

        let data: Json = response
            .json()
            .await
            .map_err(|e| PkaError::Protocol(format!("invalid chat response JSON: {e}")))?;

        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| PkaError::Protocol("unexpected chat response structure".to_string()))?;

        let mut parsed: Json = serde_json::from_str(content).map_err(|e| {
            let mut preview = content.trim().to_string();
            if preview.chars().count() > 160 {
                preview = preview.chars().take(160).collect::<String>() + "...";
            }
            PkaError::Validation(format!("response was not valid JSON ({e}). Preview: {preview}"))
        })?;

        apply_schema_defaults(&self.schema, &mut parsed);

        if let Err(mut errors) = self.compiled_schema.validate(&parsed) {
            let message = errors
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "schema validation failed".to_string());
            return Err(PkaError::Validation(format!("response failed schema validation: {message}")));
        }

        serde_json::from_value(parsed)
            .map_err(|e| PkaError::Protocol(format!("answer did not match expected shape: {e}")))
    }
}

fn json_message(role: &str, content: &str) -> Json {
    serde_json::json!({"role": role, "content": content})
}

fn load_schema(path: &Path) -> Result<(Json, String), PkaError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PkaError::Config(format!("failed to read answer schema {}: {e}", path.display())))?;
    let schema: Json = serde_json::from_str(&text)
        .map_err(|e| PkaError::Config(format!("invalid answer schema JSON: {e}")))?;
    Ok((schema, text))
}

/// Fill in any property missing from `data` that carries a `"default"` in
/// the schema, mirroring `ChatService._apply_schema_defaults`.
fn apply_schema_defaults(schema: &Json, data: &mut Json) {
    let (Some(properties), Some(object)) = (schema.get("properties").and_then(|p| p.as_object()), data.as_object_mut()) else {
        return;
    };
    for (key, definition) in properties {
        if !object.contains_key(key) {
            if let Some(default) = definition.get("default") {
                object.insert(key.clone(), default.clone());
            }
        }
    }
}

/// Format snippets into the block embedded in the user prompt, or the
/// `NO_SNIPPETS_AVAILABLE` sentinel when retrieval found nothing — the
/// model must see this explicitly rather than an empty context block, so
/// it has a concrete signal to abstain on.
fn format_context(snippets: &[ContextSnippet]) -> String {
    if snippets.is_empty() {
        return "NO_SNIPPETS_AVAILABLE".to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(idx, snippet)| {
            format!(
                "SNIPPET {}:\ncitation: {}\nrationale: {}\ntext: {}",
                idx + 1,
                snippet.citation,
                snippet.rationale,
                snippet.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_context_sentinel_for_empty_snippets() {
        assert_eq!(format_context(&[]), "NO_SNIPPETS_AVAILABLE");
    }

    #[test]
    fn apply_schema_defaults_fills_missing_optional_fields() {
        let schema = serde_json::json!({
            "properties": {
                "bullets": {"type": "array", "default": []},
                "abstain": {"type": "boolean"}
            }
        });
        let mut data = serde_json::json!({"abstain": false, "answer": "x"});
        apply_schema_defaults(&schema, &mut data);
        assert_eq!(data["bullets"], serde_json::json!([]));
    }

    #[test]
    fn apply_schema_defaults_does_not_overwrite_present_fields() {
        let schema = serde_json::json!({
            "properties": {"bullets": {"default": []}}
        });
        let mut data = serde_json::json!({"bullets": ["already here"]});
        apply_schema_defaults(&schema, &mut data);
        assert_eq!(data["bullets"], serde_json::json!(["already here"]));
    }
}
