//! `ReadinessService` — readiness probes for the Ollama daemon and the
//! configured chat model (spec §4.10).
//!
//! Grounded on `original_source/pka/app/services/health.py`
//! (`ReadinessService`).

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::SynthesisConfig;

/// One readiness probe's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct HealthProbe {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
    pub checked_at: chrono::DateTime<Utc>,
}

/// The aggregate readiness result returned by `GET /health/`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub probes: Vec<HealthProbe>,
}

pub struct ReadinessService {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
}

impl ReadinessService {
    pub fn new(config: &SynthesisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.model.clone(),
        }
    }

    /// Run every readiness probe and report the aggregate status.
    pub async fn run_checks(&self) -> HealthStatus {
        let (tags_payload, tags_error) = self.fetch_tags().await;
        let probes = vec![
            check_ollama_daemon(tags_error.as_deref()),
            self.check_ollama_model(tags_payload.as_ref(), tags_error.as_deref()),
        ];
        let status = if probes.iter().all(|p| p.healthy) { "pass" } else { "fail" };
        HealthStatus {
            status: status.to_string(),
            probes,
        }
    }

    async fn fetch_tags(&self) -> (Option<serde_json::Value>, Option<String>) {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return (None, Some(format!("Ollama unreachable: {e}"))),
        };
        if !response.status().is_success() {
            return (None, Some(format!("Ollama unreachable: HTTP {}", response.status())));
        }
        match response.json::<serde_json::Value>().await {
            Ok(payload) => (Some(payload), None),
            Err(e) => (None, Some(format!("Invalid response from Ollama: {e}"))),
        }
    }

    fn check_ollama_model(
        &self,
        payload: Option<&serde_json::Value>,
        tags_error: Option<&str>,
    ) -> HealthProbe {
        if let Some(error) = tags_error {
            return HealthProbe {
                name: "ollama_chat_model".to_string(),
                healthy: false,
                detail: error.to_string(),
                checked_at: Utc::now(),
            };
        }

        let mut names: HashSet<String> = HashSet::new();
        if let Some(models) = payload.and_then(|p| p.get("models")).and_then(|m| m.as_array()) {
            for model in models {
                let name = model
                    .get("name")
                    .or_else(|| model.get("model"))
                    .and_then(|v| v.as_str());
                if let Some(name) = name {
                    names.insert(name.to_string());
                }
            }
        }
        let bare_names: Vec<String> = names
            .iter()
            .filter_map(|n| n.split_once(':').map(|(bare, _)| bare.to_string()))
            .collect();
        names.extend(bare_names);

        if names.contains(&self.chat_model) {
            HealthProbe {
                name: "ollama_chat_model".to_string(),
                healthy: true,
                detail: "OK".to_string(),
                checked_at: Utc::now(),
            }
        } else {
            HealthProbe {
                name: "ollama_chat_model".to_string(),
                healthy: false,
                detail: format!("Missing model: {}", self.chat_model),
                checked_at: Utc::now(),
            }
        }
    }
}

fn check_ollama_daemon(tags_error: Option<&str>) -> HealthProbe {
    match tags_error {
        Some(error) => HealthProbe {
            name: "ollama_daemon".to_string(),
            healthy: false,
            detail: error.to_string(),
            checked_at: Utc::now(),
        },
        None => HealthProbe {
            name: "ollama_daemon".to_string(),
            healthy: true,
            detail: "OK".to_string(),
            checked_at: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_probe_is_healthy_without_error() {
        let probe = check_ollama_daemon(None);
        assert!(probe.healthy);
    }

    #[test]
    fn daemon_probe_is_unhealthy_with_error() {
        let probe = check_ollama_daemon(Some("Ollama unreachable: connection refused"));
        assert!(!probe.healthy);
        assert_eq!(probe.detail, "Ollama unreachable: connection refused");
    }

    #[test]
    fn model_probe_tolerates_tag_suffix() {
        let service = ReadinessService {
            client: reqwest::Client::new(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.1:8b".to_string(),
        };
        let payload = serde_json::json!({"models": [{"name": "llama3.1:8b-instruct"}, {"name": "llama3.1:8b"}]});
        let probe = service.check_ollama_model(Some(&payload), None);
        assert!(probe.healthy);
    }

    #[test]
    fn model_probe_fails_when_model_missing() {
        let service = ReadinessService {
            client: reqwest::Client::new(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.1:8b".to_string(),
        };
        let payload = serde_json::json!({"models": [{"name": "mistral:7b"}]});
        let probe = service.check_ollama_model(Some(&payload), None);
        assert!(!probe.healthy);
    }
}
