//! Versioned prompt template registry (spec §4.7).
//!
//! Grounded on `original_source/pka/app/services/synth/templates.py`.
//! Python's `PromptTemplate.render` uses `str.format`; the Rust port uses
//! plain placeholder substitution instead, since the schema text embedded
//! in a rendered prompt routinely contains literal `{`/`}` that would
//! otherwise need escaping for `format!`.

use std::collections::HashMap;

use crate::error::PkaError;

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub content: String,
    pub version: String,
}

impl PromptTemplate {
    /// Substitute `{key}` placeholders in the template body with the given
    /// values. Unknown placeholders are left untouched.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut rendered = self.content.clone();
        for (key, value) in values {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        rendered
    }
}

pub struct PromptTemplateRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptTemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate, PkaError> {
        self.templates
            .get(name)
            .ok_or_else(|| PkaError::Config(format!("prompt template '{name}' is not registered")))
    }

    /// The registry pre-populated with the built-in `assistant-v1`
    /// template (spec §4.7's cite-or-abstain instruction set).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PromptTemplate {
            name: "assistant-v1".to_string(),
            version: "1".to_string(),
            content: concat!(
                "Question: {question}\n",
                "Mode: {mode}\n\n",
                "Context snippets:\n{context}\n\n",
                "Respond with a single JSON object matching this schema exactly:\n",
                "{schema_json}\n",
            )
            .to_string(),
        });
        registry
    }
}

impl Default for PromptTemplateRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_placeholders() {
        let template = PromptTemplate {
            name: "t".to_string(),
            version: "1".to_string(),
            content: "Q: {question} / M: {mode}".to_string(),
        };
        let rendered = template.render(&[("question", "why?"), ("mode", "synthesize")]);
        assert_eq!(rendered, "Q: why? / M: synthesize");
    }

    #[test]
    fn get_unknown_template_errors() {
        let registry = PromptTemplateRegistry::new();
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn default_registry_has_assistant_v1() {
        let registry = PromptTemplateRegistry::with_defaults();
        assert!(registry.get("assistant-v1").is_ok());
    }
}
