//! Prompt construction and completion parsing for each prompt mode.
//!
//! Parsers are lenient about layout (markdown bullets, labels in any case,
//! surrounding quotes) and return `MalformedCompletion` when nothing usable
//! remains.

use std::fmt::Write as _;

use hop_core::{Confidence, Evidence, HopError, Prompt, PromptMode, Question, Result};

const ROLE: &str = "You are a careful research assistant answering questions that need \
several retrieval steps. Use only the evidence you are given.";

/// Completion text meaning "no further query is needed".
const DONE_MARKER: &str = "done";

fn prompt(mode: PromptMode, context: String, instructions: impl Into<String>) -> Prompt {
    Prompt {
        mode,
        role: ROLE.to_string(),
        context,
        instructions: instructions.into(),
    }
}

fn write_conclusions(out: &mut String, conclusions: &[&str]) {
    if conclusions.is_empty() {
        out.push_str("\n\nConclusions so far: none");
        return;
    }
    out.push_str("\n\nConclusions so far:");
    for (i, conclusion) in conclusions.iter().enumerate() {
        let _ = write!(out, "\n{}. {}", i + 1, conclusion);
    }
}

fn write_evidence(out: &mut String, evidence: &[&Evidence]) {
    if evidence.is_empty() {
        out.push_str("\n\nEvidence: none");
        return;
    }
    out.push_str("\n\nEvidence:");
    for e in evidence {
        let _ = write!(out, "\n[{}] ({}) {}", e.rank, e.chunk.source_id, e.chunk.text);
    }
}

/// Ask for the question split into ordered search queries.
pub fn decompose(question: &Question, max_queries: u32) -> Prompt {
    prompt(
        PromptMode::Decompose,
        format!("Question: {}", question),
        format!(
            "Break the question into at most {} short search queries, one per line, \
             in the order they should be searched. Reply with the queries only.",
            max_queries
        ),
    )
}

/// Ask for the next query targeting whatever is still missing.
pub fn follow_up(question: &Question, conclusions: &[&str]) -> Prompt {
    let mut context = format!("Question: {}", question);
    write_conclusions(&mut context, conclusions);
    prompt(
        PromptMode::FollowUpQuery,
        context,
        "Write one search query that targets the piece of information still missing \
         to answer the question. Reply with the query only, or DONE if nothing is missing.",
    )
}

/// Ask for a 0-1 relevance score of one passage against the question.
pub fn relevance(question: &Question, passage: &str) -> Prompt {
    prompt(
        PromptMode::RelevanceScore,
        format!("Question: {}\n\nPassage: {}", question, passage),
        "Rate how useful the passage is for answering the question on a scale from 0 \
         (irrelevant) to 1 (directly answers part of it). Reply with the number only.",
    )
}

/// Ask what the current hop's evidence establishes.
pub fn hop_conclusion(
    question: &Question,
    query: &str,
    conclusions: &[&str],
    evidence: &[&Evidence],
) -> Prompt {
    let mut context = format!("Question: {}\n\nSearch query: {}", question, query);
    write_conclusions(&mut context, conclusions);
    write_evidence(&mut context, evidence);
    prompt(
        PromptMode::HopConclusion,
        context,
        "State in one or two sentences what this evidence establishes toward answering \
         the question. Do not guess beyond the evidence.",
    )
}

/// Ask whether the evidence gathered so far suffices.
pub fn stop_check(question: &Question, conclusions: &[&str], evidence: &[&Evidence]) -> Prompt {
    let mut context = format!("Question: {}", question);
    write_conclusions(&mut context, conclusions);
    write_evidence(&mut context, evidence);
    prompt(
        PromptMode::StopDecision,
        context,
        "Is there enough evidence to answer the question? Reply with two lines:\n\
         sufficient: yes|no\nconfidence: high|medium|low",
    )
}

/// Ask for the final answer.
pub fn synthesize(question: &Question, conclusions: &[&str], evidence: &[&Evidence]) -> Prompt {
    let mut context = format!("Question: {}", question);
    write_conclusions(&mut context, conclusions);
    write_evidence(&mut context, evidence);
    prompt(
        PromptMode::Synthesize,
        context,
        "Answer the question as briefly as possible (a name, number or short phrase). \
         Reply with two lines:\nanswer: <answer>\nconfidence: high|medium|low",
    )
}

/// Strip a leading bullet or "1." / "2)" marker.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return rest;
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest;
        }
    }
    line
}

/// Case-insensitive `label:` prefix removal.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let trimmed = line.trim().trim_start_matches(['*', '#']).trim_start();
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..].trim_start_matches('*').trim_start();
    rest.strip_prefix(':').map(|v| v.trim().trim_matches('*').trim())
}

/// Value of the first `label: value` line.
fn labeled<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines().find_map(|line| strip_label(line, label))
}

fn trim_quotes(text: &str) -> &str {
    text.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .trim()
}

/// Normalize a generated query; `None` when empty or DONE.
pub fn normalize_query(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = strip_list_marker(line);
    let line = strip_label(line, "query").unwrap_or(line);
    let query = trim_quotes(trim_quotes(line).trim_end_matches('.'));

    if query.is_empty() || query.eq_ignore_ascii_case(DONE_MARKER) {
        None
    } else {
        Some(query.to_string())
    }
}

/// Parse one query per line, dropping duplicates and DONE markers.
pub fn parse_queries(text: &str, max_queries: usize) -> Result<Vec<String>> {
    let mut queries: Vec<String> = Vec::new();
    for line in text.lines() {
        let Some(query) = normalize_query(line) else {
            continue;
        };
        if queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
            continue;
        }
        queries.push(query);
        if queries.len() >= max_queries {
            break;
        }
    }

    if queries.is_empty() {
        return Err(HopError::malformed(PromptMode::Decompose, "no queries found"));
    }
    Ok(queries)
}

/// Leading number of `text` and the remainder after it.
fn leading_number(text: &str) -> Option<(f32, &str)> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let number = rest[..end].trim_end_matches('.').parse::<f32>().ok()?;
    Some((number, &rest[end..]))
}

/// First number in the text as a 0..=1 score.
///
/// A trailing scale (`8/10`, `3 out of 10`) divides the number; a bare value
/// outside 0..=1 is rejected.
pub fn parse_relevance(text: &str) -> Result<f32> {
    let malformed = |detail: &str| HopError::malformed(PromptMode::RelevanceScore, detail);
    let (number, rest) = leading_number(text).ok_or_else(|| malformed("no score found"))?;

    let rest = rest.trim_start();
    let scale = rest
        .strip_prefix('/')
        .or_else(|| rest.strip_prefix("out of"))
        .map(str::trim_start)
        .filter(|tail| tail.starts_with(|c: char| c.is_ascii_digit()))
        .and_then(leading_number)
        .map(|(scale, _)| scale);

    let score = match scale {
        Some(scale) if scale > 0.0 => number / scale,
        Some(_) => return Err(malformed("score scale is zero")),
        None => number,
    };

    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(malformed("score outside 0..=1"));
    }
    Ok(score)
}

/// Trimmed conclusion text.
pub fn parse_conclusion(text: &str) -> Result<String> {
    let conclusion = text.trim();
    if conclusion.is_empty() {
        return Err(HopError::malformed(PromptMode::HopConclusion, "empty conclusion"));
    }
    Ok(conclusion.to_string())
}

/// Verdict returned by the stop-decision prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SufficiencyVerdict {
    pub sufficient: bool,
    pub confidence: Option<Confidence>,
}

impl SufficiencyVerdict {
    /// Affirmative with high confidence.
    pub fn is_confident_yes(&self) -> bool {
        self.sufficient && self.confidence == Some(Confidence::High)
    }
}

fn parse_yes_no(value: &str) -> Option<bool> {
    let word: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "yes" | "true" | "sufficient" | "enough" => Some(true),
        "no" | "false" | "insufficient" | "not" => Some(false),
        _ => None,
    }
}

pub fn parse_sufficiency(text: &str) -> Result<SufficiencyVerdict> {
    let sufficient = labeled(text, "sufficient")
        .or_else(|| labeled(text, "enough"))
        .and_then(parse_yes_no)
        .or_else(|| text.lines().find(|l| !l.trim().is_empty()).and_then(parse_yes_no))
        .ok_or_else(|| HopError::malformed(PromptMode::StopDecision, "no yes/no verdict"))?;

    let confidence = labeled(text, "confidence").and_then(Confidence::parse);

    Ok(SufficiencyVerdict {
        sufficient,
        confidence,
    })
}

/// Answer and self-reported confidence from the synthesis prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutput {
    pub answer: String,
    pub confidence: Option<Confidence>,
}

pub fn parse_synthesis(text: &str) -> Result<SynthesisOutput> {
    let answer = match labeled(text, "answer") {
        Some(answer) => answer,
        None => text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && strip_label(l, "confidence").is_none())
            .unwrap_or(""),
    };
    let answer = trim_quotes(trim_quotes(answer).trim_end_matches('.'));

    if answer.is_empty() {
        return Err(HopError::malformed(PromptMode::Synthesize, "empty answer"));
    }

    Ok(SynthesisOutput {
        answer: answer.to_string(),
        confidence: labeled(text, "confidence").and_then(Confidence::parse),
    })
}
