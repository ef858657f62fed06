//! `EvaluationRunner` — drive `/api/chat` against a golden dataset and
//! score results against per-example expectations (spec §4.10).
//!
//! Grounded on `original_source/pka/app/services/evals/scorer.py`
//! (`EvaluationRunner`, `ExampleExpectations`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as Json;

/// Per-example scoring expectations from the dataset YAML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExampleExpectations {
    #[serde(default = "default_min_sources")]
    pub min_sources: i64,
    #[serde(default)]
    pub require_abstain: Option<bool>,
    #[serde(default, rename = "required_sources")]
    pub required_source_ids: Vec<String>,
    #[serde(default)]
    pub max_latency_ms: Option<i64>,
}

fn default_min_sources() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct DatasetExample {
    question: Option<String>,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    expectations: ExampleExpectations,
}

fn default_mode() -> String {
    "synthesize".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Dataset {
    #[serde(default)]
    examples: Vec<DatasetExample>,
}

/// Outcome of scoring one example.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExampleResult {
    pub index: usize,
    pub question: String,
    pub mode: String,
    pub status: String,
    pub latency_ms: i64,
    pub source_count: usize,
    pub abstain: bool,
    pub issues: Vec<String>,
}

/// Aggregate run statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationSummary {
    pub total_examples: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub avg_latency_ms: Option<i64>,
    pub p95_latency_ms: Option<i64>,
}

/// The full evaluation report: summary plus per-example results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationReport {
    pub summary: EvaluationSummary,
    pub results: Vec<ExampleResult>,
}

pub struct EvaluationRunner {
    client: reqwest::Client,
    base_url: String,
}

impl EvaluationRunner {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Execute every example in the dataset at `dataset_path` against
    /// `/api/chat` and return the scored report.
    pub async fn run(&self, dataset_path: &Path) -> anyhow::Result<EvaluationReport> {
        let raw = std::fs::read_to_string(dataset_path)
            .map_err(|e| anyhow::anyhow!("dataset not found at {}: {e}", dataset_path.display()))?;
        let dataset: Dataset = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid dataset YAML: {e}"))?;

        let mut results = Vec::with_capacity(dataset.examples.len());
        let mut latencies = Vec::new();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for (offset, example) in dataset.examples.iter().enumerate() {
            let index = offset + 1;
            let Some(question) = example.question.clone().filter(|q| !q.is_empty()) else {
                results.push(ExampleResult {
                    index,
                    question: String::new(),
                    mode: example.mode.clone(),
                    status: "error".to_string(),
                    latency_ms: 0,
                    source_count: 0,
                    abstain: false,
                    issues: vec!["Missing question field.".to_string()],
                });
                failed += 1;
                continue;
            };

            let result = self.run_example(index, &question, &example.mode, &example.expectations).await;
            if result.status == "pass" {
                completed += 1;
            } else {
                failed += 1;
            }
            latencies.push(result.latency_ms);
            results.push(result);
        }

        let summary = summarise(dataset.examples.len(), completed, failed, &latencies);
        Ok(EvaluationReport { summary, results })
    }

    async fn run_example(
        &self,
        index: usize,
        question: &str,
        mode: &str,
        expectations: &ExampleExpectations,
    ) -> ExampleResult {
        let url = format!("{}/api/chat", self.base_url);
        let response = match self
            .client
            .post(&url)
            .json(&serde_json::json!({"question": question, "mode": mode}))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ExampleResult {
                    index,
                    question: question.to_string(),
                    mode: mode.to_string(),
                    status: "error".to_string(),
                    latency_ms: 0,
                    source_count: 0,
                    abstain: false,
                    issues: vec![format!("Request failed: {e}")],
                }
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return ExampleResult {
                index,
                question: question.to_string(),
                mode: mode.to_string(),
                status: "fail".to_string(),
                latency_ms: 0,
                source_count: 0,
                abstain: false,
                issues: vec![format!("HTTP {status}: {text}")],
            };
        }

        let payload: Json = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                return ExampleResult {
                    index,
                    question: question.to_string(),
                    mode: mode.to_string(),
                    status: "fail".to_string(),
                    latency_ms: 0,
                    source_count: 0,
                    abstain: false,
                    issues: vec![format!("Invalid JSON response: {e}")],
                }
            }
        };

        evaluate_example(index, question, mode, &payload, expectations)
    }
}

fn evaluate_example(
    index: usize,
    question: &str,
    mode: &str,
    payload: &Json,
    expectations: &ExampleExpectations,
) -> ExampleResult {
    let mut issues = Vec::new();

    let answer = payload.get("answer").cloned().unwrap_or(Json::Null);
    let abstain = answer.get("abstain").and_then(|v| v.as_bool()).unwrap_or(false);
    let latency_ms = payload.get("latency_ms").and_then(|v| v.as_i64()).unwrap_or(0);

    let source_ids: HashSet<String> = answer
        .get("sources")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect();
    let source_count = source_ids.len();

    if let Some(required_abstain) = expectations.require_abstain {
        if abstain != required_abstain {
            let expectation = if required_abstain { "abstain" } else { "provide an answer" };
            issues.push(format!("Expected model to {expectation}, received abstain={abstain}."));
        }
    }

    if !abstain {
        if (source_count as i64) < expectations.min_sources {
            issues.push(format!(
                "Insufficient citations: expected >= {}, found {source_count}.",
                expectations.min_sources
            ));
        }
        let missing: Vec<&String> = expectations
            .required_source_ids
            .iter()
            .filter(|id| !source_ids.contains(*id))
            .collect();
        if !missing.is_empty() {
            let joined = missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            issues.push(format!("Missing required citations: {joined}."));
        }
    }

    if let Some(max_latency) = expectations.max_latency_ms {
        if latency_ms > max_latency {
            issues.push(format!("Latency {latency_ms}ms exceeds threshold of {max_latency}ms."));
        }
    }

    let status = if issues.is_empty() { "pass" } else { "fail" };

    ExampleResult {
        index,
        question: question.to_string(),
        mode: mode.to_string(),
        status: status.to_string(),
        latency_ms,
        source_count,
        abstain,
        issues,
    }
}

fn summarise(total: usize, completed: usize, failed: usize, latencies: &[i64]) -> EvaluationSummary {
    let pending = total.saturating_sub(completed + failed);
    let (avg_latency_ms, p95_latency_ms) = if latencies.is_empty() {
        (None, None)
    } else {
        let sum: i64 = latencies.iter().sum();
        let avg = sum / latencies.len() as i64;
        (Some(avg), Some(percentile(latencies, 95)))
    };
    EvaluationSummary {
        total_examples: total,
        completed,
        failed,
        pending,
        avg_latency_ms,
        p95_latency_ms,
    }
}

fn percentile(values: &[i64], pct: i64) -> i64 {
    if values.is_empty() {
        return 0;
    }
    let mut ordered = values.to_vec();
    ordered.sort_unstable();
    if ordered.len() == 1 {
        return ordered[0];
    }
    let rank = (pct as f64 / 100.0) * (ordered.len() - 1) as f64;
    let lower_index = rank.floor() as usize;
    let upper_index = (lower_index + 1).min(ordered.len() - 1);
    let weight = rank - lower_index as f64;
    let interpolated = ordered[lower_index] as f64 * (1.0 - weight) + ordered[upper_index] as f64 * weight;
    interpolated.round() as i64
}

/// Render a report as the markdown summary written alongside `--report`.
pub fn render_markdown_report(report: &EvaluationReport) -> String {
    let summary = &report.summary;
    let mut lines = vec![
        "# Evaluation Report".to_string(),
        String::new(),
        format!("- Total examples: {}", summary.total_examples),
        format!("- Completed: {}", summary.completed),
        format!("- Failed: {}", summary.failed),
        format!("- Pending: {}", summary.pending),
    ];
    if let Some(avg) = summary.avg_latency_ms {
        lines.push(format!("- Average latency: {avg} ms"));
    }
    if let Some(p95) = summary.p95_latency_ms {
        lines.push(format!("- P95 latency: {p95} ms"));
    }
    lines.push(String::new());
    lines.push("## Result Breakdown".to_string());
    for result in &report.results {
        lines.push(format!("- [{}] {}", result.status.to_uppercase(), result.question));
        for issue in &result.issues {
            lines.push(format!("  - {issue}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_when_expectations_are_met() {
        let payload = serde_json::json!({
            "latency_ms": 120,
            "answer": {"abstain": false, "sources": [{"id": "a"}, {"id": "b"}]}
        });
        let expectations = ExampleExpectations {
            min_sources: 2,
            require_abstain: Some(false),
            required_source_ids: vec!["a".to_string()],
            max_latency_ms: Some(500),
        };
        let result = evaluate_example(1, "q", "synthesize", &payload, &expectations);
        assert_eq!(result.status, "pass");
    }

    #[test]
    fn fails_when_abstain_mismatches() {
        let payload = serde_json::json!({"latency_ms": 50, "answer": {"abstain": true, "sources": []}});
        let expectations = ExampleExpectations {
            min_sources: 1,
            require_abstain: Some(false),
            required_source_ids: vec![],
            max_latency_ms: None,
        };
        let result = evaluate_example(1, "q", "synthesize", &payload, &expectations);
        assert_eq!(result.status, "fail");
        assert!(result.issues[0].contains("provide an answer"));
    }

    #[test]
    fn fails_when_latency_exceeds_threshold() {
        let payload = serde_json::json!({"latency_ms": 900, "answer": {"abstain": false, "sources": [{"id": "a"}]}});
        let expectations = ExampleExpectations {
            min_sources: 1,
            require_abstain: None,
            required_source_ids: vec![],
            max_latency_ms: Some(500),
        };
        let result = evaluate_example(1, "q", "synthesize", &payload, &expectations);
        assert_eq!(result.status, "fail");
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        assert_eq!(percentile(&[10, 20, 30, 40], 95), 39);
        assert_eq!(percentile(&[5], 95), 5);
        assert_eq!(percentile(&[], 95), 0);
    }

    #[test]
    fn summarise_computes_averages() {
        let summary = summarise(3, 2, 1, &[100, 200, 300]);
        assert_eq!(summary.avg_latency_ms, Some(200));
        assert_eq!(summary.pending, 0);
    }
}
