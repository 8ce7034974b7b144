//! Deterministic retrieval and reasoning ports for tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use hop_core::{
    normalize_chunk_text, Completion, HopError, Prompt, PromptMode, ReasoningPort, Result,
    RetrievalPort, ScoredPassage,
};

/// Retrieval port backed by a fixed query → passages table.
///
/// Queries are matched after case and whitespace folding; unknown queries
/// return no passages.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    table: HashMap<String, Vec<ScoredPassage>>,
    failures_remaining: AtomicUsize,
    always_fail: bool,
    calls: AtomicUsize,
}

impl StaticRetriever {
    /// Create an empty retriever (every search returns nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retriever whose every search fails.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// Register passages for a query.
    pub fn with(mut self, query: &str, passages: Vec<ScoredPassage>) -> Self {
        self.table.insert(normalize_chunk_text(query), passages);
        self
    }

    /// Fail the next `n` searches before answering normally.
    pub fn fail_first(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of search calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalPort for StaticRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.always_fail {
            return Err(HopError::retrieval("static retriever configured to fail"));
        }
        let pending = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(HopError::retrieval("transient failure"));
        }

        Ok(self
            .table
            .get(&normalize_chunk_text(query))
            .map(|passages| passages.iter().take(k).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unavailable,
}

#[derive(Debug, Clone)]
struct Rule {
    mode: PromptMode,
    needle: String,
    reply: Reply,
}

/// Reasoning port that answers from a script of rules.
///
/// A rule matches when its mode equals the prompt mode and its needle occurs
/// in the prompt context; the first matching rule wins, then the per-mode
/// default. Prompts with no rule and no default fail as unavailable.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    rules: Vec<Rule>,
    defaults: HashMap<PromptMode, Reply>,
    unauthenticated: bool,
    calls: Mutex<Vec<PromptMode>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `text` when `mode` is requested and the context contains `needle`.
    pub fn on(mut self, mode: PromptMode, needle: &str, text: &str) -> Self {
        self.rules.push(Rule {
            mode,
            needle: needle.to_string(),
            reply: Reply::Text(text.to_string()),
        });
        self
    }

    /// Fail with `ReasoningUnavailable` when `mode` is requested and the
    /// context contains `needle`.
    pub fn fail_on(mut self, mode: PromptMode, needle: &str) -> Self {
        self.rules.push(Rule {
            mode,
            needle: needle.to_string(),
            reply: Reply::Unavailable,
        });
        self
    }

    /// Reply with `text` for any `mode` prompt no rule matched.
    pub fn default_reply(mut self, mode: PromptMode, text: &str) -> Self {
        self.defaults.insert(mode, Reply::Text(text.to_string()));
        self
    }

    /// Fail every `mode` prompt no rule matched.
    pub fn fail(mut self, mode: PromptMode) -> Self {
        self.defaults.insert(mode, Reply::Unavailable);
        self
    }

    /// Reject every prompt as unauthenticated.
    pub fn unauthenticated(mut self) -> Self {
        self.unauthenticated = true;
        self
    }

    /// Number of prompts received in `mode`.
    pub fn calls(&self, mode: PromptMode) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|m| **m == mode).count())
            .unwrap_or(0)
    }

    fn reply_for(&self, prompt: &Prompt) -> Option<&Reply> {
        self.rules
            .iter()
            .find(|r| r.mode == prompt.mode && prompt.context.contains(&r.needle))
            .map(|r| &r.reply)
            .or_else(|| self.defaults.get(&prompt.mode))
    }
}

#[async_trait]
impl ReasoningPort for ScriptedReasoner {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.mode);
        }

        if self.unauthenticated {
            return Err(HopError::unauthenticated("scripted reasoner rejects all keys"));
        }

        match self.reply_for(prompt) {
            Some(Reply::Text(text)) => Ok(Completion::new(text.clone())),
            Some(Reply::Unavailable) | None => Err(HopError::reasoning(format!(
                "no scripted reply for {}",
                prompt.mode
            ))),
        }
    }
}
