//! hop-providers - Concrete retrieval and reasoning ports
//!
//! This crate provides implementations of the `RetrievalPort` and
//! `ReasoningPort` capability traits.
//!
//! # Providers
//!
//! - [`CorpusRetriever`]: BM25 over an in-memory JSONL passage corpus
//! - [`ChatReasoner`]: OpenAI-compatible chat completion endpoint
//! - [`StaticRetriever`] / [`ScriptedReasoner`]: deterministic doubles for
//!   tests and demos

mod chat;
mod corpus;
mod mock;

pub use chat::ChatReasoner;
pub use corpus::{CorpusPassage, CorpusRetriever};
pub use mock::{ScriptedReasoner, StaticRetriever};

// Re-export the port traits for convenience
pub use hop_core::{ReasoningPort, RetrievalPort};
