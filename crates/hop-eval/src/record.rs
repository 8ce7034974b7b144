//! Evaluation inputs, per-question results and persisted experiment records.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use hop_core::{Confidence, HopError, Result, StopReason};

use crate::metrics::Aggregate;

/// One labelled question.
///
/// HotpotQA field names (`_id`, `type`, `level`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalExample {
    #[serde(alias = "_id")]
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, alias = "level", skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl EvalExample {
    pub fn new(id: impl Into<String>, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            category: None,
            difficulty: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }
}

/// Load examples from a JSON array or a JSON Lines file.
pub fn load_examples(path: impl AsRef<Path>) -> Result<Vec<EvalExample>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                HopError::invalid_argument(format!("{}:{}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

/// Outcome and scores for one evaluated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub id: String,
    pub question: String,
    pub prediction: String,
    pub gold: String,
    pub exact_match: f64,
    pub f1: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub confidence: Confidence,
    pub hop_count: usize,
    pub queries: Vec<String>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate scores for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub overall: Aggregate,

    /// Grouping name → group key → aggregate.
    #[serde(default)]
    pub by_group: BTreeMap<String, BTreeMap<String, Aggregate>>,

    /// Questions whose controller run ended in an error result.
    #[serde(default)]
    pub errors: usize,

    pub elapsed_seconds: f64,
    pub questions_per_second: f64,
}

/// A persisted evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    pub name: String,
    pub description: String,

    /// Unix milliseconds.
    pub created_at: u64,

    /// Configuration the run used.
    pub config: serde_json::Value,

    pub metrics: Metrics,

    /// Per-question results in input order.
    pub results: Vec<QuestionResult>,

    /// Lowest-F1 results below the failure threshold.
    pub failures: Vec<QuestionResult>,

    /// True when the run stopped early on request.
    #[serde(default)]
    pub cancelled: bool,
}

impl ExperimentRecord {
    pub fn summary(&self) -> ExperimentSummary {
        ExperimentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            overall: self.metrics.overall,
            cancelled: self.cancelled,
        }
    }
}

/// Listing entry for a stored experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: u64,
    pub overall: Aggregate,
    pub cancelled: bool,
}

/// New experiment id: a filesystem-safe slug of the name plus a ULID.
pub fn new_experiment_id(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "experiment" } else { slug };

    format!("{}_{}", slug, Ulid::new())
}
