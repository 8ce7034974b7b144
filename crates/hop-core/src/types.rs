//! Core domain types for multi-hop question answering.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HopError, Result};
use crate::text::normalize_chunk_text;

/// The original user question. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Question(String);

impl Question {
    /// Create a question from raw text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The question text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the question has no visible characters.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A search string issued at a given hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Search text sent to the retrieval port.
    pub text: String,

    /// Hop that issued this query (1-based).
    pub hop: u32,

    /// Why the query was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
}

impl Query {
    /// Create a query without an objective.
    pub fn new(text: impl Into<String>, hop: u32) -> Self {
        Self {
            text: text.into(),
            hop,
            objective: None,
        }
    }

    /// Attach an objective.
    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }
}

/// Deduplication key for retrieved text (blake3 of the normalized text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkKey(String);

impl ChunkKey {
    /// Compute the key for a piece of text.
    pub fn of(text: &str) -> Self {
        let normalized = normalize_chunk_text(text);
        Self(blake3::hash(normalized.as_bytes()).to_hex().to_string())
    }

    /// Hex form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A passage returned by the retrieval port, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Passage text.
    pub text: String,

    /// Identifier of the source document.
    pub source_id: String,

    /// Similarity score reported by the retrieval port.
    pub score: f32,

    /// Query text that retrieved this chunk.
    pub query: String,

    /// Hop that retrieved this chunk.
    pub hop: u32,
}

impl RetrievedChunk {
    /// Deduplication key of this chunk.
    pub fn key(&self) -> ChunkKey {
        ChunkKey::of(&self.text)
    }
}

/// Where an evidence relevance score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Judged by the reasoning port against the question.
    Model,
    /// Raw retrieval similarity (model judgment unavailable).
    Similarity,
}

/// Whether ranked evidence is considered relevant to the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    Kept,
    Discarded,
}

/// A ranked chunk inside a hop record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// The underlying chunk (first occurrence).
    pub chunk: RetrievedChunk,

    /// Rank position (1-based).
    pub rank: u32,

    /// Relevance to the original question, 0-1 for model scores.
    pub relevance: f32,

    /// Where `relevance` came from.
    pub score_source: ScoreSource,

    /// Kept or discarded relative to the question.
    pub judgment: Judgment,
}

impl Evidence {
    pub fn is_kept(&self) -> bool {
        self.judgment == Judgment::Kept
    }
}

/// Why the hop loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured hop cap was reached.
    MaxHops,
    /// The reasoning port judged the evidence sufficient with high confidence.
    EnoughEvidence,
    /// The hop found nothing that earlier hops had not already found.
    NoNewEvidence,
    /// No usable follow-up query could be produced.
    QueryGenerationExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxHops => "max_hops",
            Self::EnoughEvidence => "enough_evidence",
            Self::NoNewEvidence => "no_new_evidence",
            Self::QueryGenerationExhausted => "query_generation_exhausted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal decision recorded on the final hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDecision {
    pub reason: StopReason,

    /// Human-readable diagnostic.
    pub detail: String,
}

impl StopDecision {
    pub fn new(reason: StopReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// One completed iteration of query, retrieve, rank, conclude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    /// Hop index (1-based).
    pub hop: u32,

    /// Query issued at this hop.
    pub query: Query,

    /// Ranked evidence after merging with earlier hops.
    pub evidence: Vec<Evidence>,

    /// Number of retrieved chunks not seen in earlier hops.
    pub new_chunks: usize,

    /// What this hop's evidence establishes, verbatim from the reasoning port.
    pub conclusion: String,

    /// Present only on the final hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopDecision>,
}

impl HopRecord {
    /// Evidence judged relevant, in rank order.
    pub fn kept_evidence(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(|e| e.is_kept())
    }
}

/// Ordered, append-only sequence of hop records for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    question: Question,
    hops: Vec<HopRecord>,
}

impl ReasoningTrace {
    /// Start an empty trace for a question.
    pub fn new(question: Question) -> Self {
        Self {
            question,
            hops: Vec::new(),
        }
    }

    /// Append a finalized hop record.
    ///
    /// Hop indices must continue contiguously from 1, and nothing may follow
    /// a record that carries a stop decision.
    pub fn push(&mut self, record: HopRecord) -> Result<()> {
        if self.is_complete() {
            return Err(HopError::internal(format!(
                "hop {} appended after trace was terminated",
                record.hop
            )));
        }

        let expected = self.hops.len() as u32 + 1;
        if record.hop != expected {
            return Err(HopError::internal(format!(
                "hop index {} out of sequence, expected {}",
                record.hop, expected
            )));
        }

        self.hops.push(record);
        Ok(())
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn last(&self) -> Option<&HopRecord> {
        self.hops.last()
    }

    /// The terminal stop decision, if the trace has finished.
    pub fn stop_decision(&self) -> Option<&StopDecision> {
        self.hops.last().and_then(|h| h.stop.as_ref())
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_decision().map(|s| s.reason)
    }

    /// True once the final hop has a stop decision.
    pub fn is_complete(&self) -> bool {
        self.stop_decision().is_some()
    }

    /// Hop conclusions in hop order.
    pub fn conclusions(&self) -> Vec<&str> {
        self.hops.iter().map(|h| h.conclusion.as_str()).collect()
    }

    /// Ranked evidence as of the final hop.
    pub fn final_evidence(&self) -> &[Evidence] {
        self.hops
            .last()
            .map(|h| h.evidence.as_slice())
            .unwrap_or(&[])
    }
}

/// Confidence label attached to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Parse a label leniently ("High", " medium.", "LOW").
    pub fn parse(label: &str) -> Option<Self> {
        let cleaned: String = label
            .trim()
            .chars()
            .filter(|c| c.is_alphabetic())
            .collect::<String>()
            .to_lowercase();
        match cleaned.as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of the hop loop where a degradation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Decompose,
    GenerateQuery,
    Retrieve,
    Rank,
    Conclude,
    StopCheck,
    Synthesize,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decompose => "decompose",
            Self::GenerateQuery => "generate_query",
            Self::Retrieve => "retrieve",
            Self::Rank => "rank",
            Self::Conclude => "conclude",
            Self::StopCheck => "stop_check",
            Self::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A partial failure absorbed while answering a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    /// Hop the failure belongs to (0 before the first hop).
    pub hop: u32,

    pub step: PipelineStep,

    pub message: String,
}

/// Final output of one `ask` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub question: Question,

    /// Final answer text (empty when no answer could be produced).
    pub answer: String,

    pub confidence: Confidence,

    /// Hop conclusions in order, plus stop reason and degradation notes.
    pub reasoning_summary: String,

    pub trace: ReasoningTrace,

    /// Query texts in hop order.
    pub queries: Vec<String>,

    pub hop_count: usize,

    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,

    /// Partial failures absorbed along the way.
    #[serde(default)]
    pub degradations: Vec<Degradation>,

    /// Set when the question could not be processed at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnswerResult {
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.trace.stop_reason()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
