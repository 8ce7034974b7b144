//! hop-core - Core types and traits for multi-hop question answering
//!
//! This crate provides the data model (questions, queries, chunks, evidence,
//! hop records, traces, answers), the retrieval and reasoning port traits,
//! error handling and configuration shared by the rest of the workspace.

pub mod config;
pub mod error;
pub mod text;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{HopError, Result};
pub use text::{answer_tokens, normalize_answer, normalize_chunk_text};
pub use traits::*;
pub use types::*;
