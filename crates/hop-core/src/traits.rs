//! Capability traits for the external retrieval and reasoning services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// A passage returned by a retrieval backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    /// Passage text.
    pub text: String,

    /// Identifier of the source document.
    pub source_id: String,

    /// Similarity score (higher is better).
    pub score: f32,
}

impl ScoredPassage {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score,
        }
    }
}

/// Retrieval capability.
///
/// Implementations must be deterministic for identical index state, query
/// and `k`.
#[async_trait]
pub trait RetrievalPort: Send + Sync {
    /// Return up to `k` passages for `query`, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>>;
}

/// Which of the controller's prompts a completion request serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Split the question into an ordered list of search queries.
    Decompose,
    /// Produce the next search query targeting missing information.
    FollowUpQuery,
    /// Score one passage 0-1 against the question.
    RelevanceScore,
    /// Summarize what the current hop's evidence establishes.
    HopConclusion,
    /// Judge whether the evidence suffices to answer.
    StopDecision,
    /// Produce the final answer.
    Synthesize,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decompose => "decompose",
            Self::FollowUpQuery => "follow_up_query",
            Self::RelevanceScore => "relevance_score",
            Self::HopConclusion => "hop_conclusion",
            Self::StopDecision => "stop_decision",
            Self::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Selected prompt mode.
    pub mode: PromptMode,

    /// System role the model should adopt.
    pub role: String,

    /// Question, evidence and prior conclusions.
    pub context: String,

    /// Task and output format.
    pub instructions: String,
}

/// Raw completion text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Reasoning (language-model completion) capability.
#[async_trait]
pub trait ReasoningPort: Send + Sync {
    /// Complete a prompt. Callers select the mode explicitly via `prompt.mode`.
    async fn complete(&self, prompt: &Prompt) -> Result<Completion>;
}
