//! hop-reason - Multi-hop reasoning controller
//!
//! This crate answers questions that need more than one retrieval step. Each
//! hop issues a query, merges what comes back with earlier evidence, ranks it
//! against the original question and records a conclusion, until the evidence
//! suffices, nothing new turns up or the hop cap is reached.
//!
//! # Features
//!
//! - Explicit hop state machine with a pure stop rule
//! - Per-trace evidence deduplication and relevance ranking
//! - Timeout and retry-once policy around every port call
//! - Rule-based answer confidence and a reasoning summary built from the trace
//!
//! # Example
//!
//! ```rust,ignore
//! use hop_reason::HopController;
//! use std::sync::Arc;
//!
//! let controller = HopController::new(Arc::new(retriever), Arc::new(reasoner), config);
//! let result = controller.ask("What nationality is the director of Lagaan?", 3).await;
//! println!("{} ({})", result.answer, result.confidence);
//! ```

mod call;
mod controller;
pub mod prompt;
mod ranker;
mod synthesizer;

pub use controller::{decide_stop, HopController, StopSignals, NO_CONCLUSION};
pub use ranker::{ChunkRanker, RankOutcome};
pub use synthesizer::{assess_confidence, reasoning_summary, AnswerSynthesizer, Synthesis};

// Re-export for convenience
pub use hop_core::{AnswerResult, ReasoningTrace, StopReason};
