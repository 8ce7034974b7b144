//! Final answer synthesis and confidence assignment.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use hop_core::{
    answer_tokens, normalize_answer, Confidence, Degradation, Evidence, PipelineStep,
    ReasoningPort, ReasoningTrace, Result, StopReason,
};

use crate::call::CallPolicy;
use crate::prompt;

/// Answer, confidence label and human-readable summary for one trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub confidence: Confidence,
    pub reasoning_summary: String,
}

/// Produces the final answer from a finished trace.
pub struct AnswerSynthesizer<M: ReasoningPort + ?Sized> {
    reasoner: Arc<M>,
    policy: CallPolicy,
}

impl<M: ReasoningPort + ?Sized> AnswerSynthesizer<M> {
    pub(crate) fn new(reasoner: Arc<M>, policy: CallPolicy) -> Self {
        Self { reasoner, policy }
    }

    /// Synthesize an answer over the trace's kept evidence.
    ///
    /// A failed synthesis call is recorded in `degradations` and yields an
    /// empty low-confidence answer. Only fatal errors are returned.
    pub async fn synthesize(
        &self,
        trace: &ReasoningTrace,
        degradations: &mut Vec<Degradation>,
    ) -> Result<Synthesis> {
        let kept: Vec<&Evidence> = trace.final_evidence().iter().filter(|e| e.is_kept()).collect();
        let stop = trace.stop_reason();

        let (answer, model_confidence) = if kept.is_empty() {
            debug!("No kept evidence, skipping synthesis call");
            (String::new(), None)
        } else {
            let request = prompt::synthesize(trace.question(), &trace.conclusions(), &kept);
            match self
                .policy
                .complete(self.reasoner.as_ref(), &request, prompt::parse_synthesis)
                .await
            {
                Ok(output) => (output.answer, output.confidence),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Synthesis failed: {}", e);
                    degradations.push(Degradation {
                        hop: trace.len() as u32,
                        step: PipelineStep::Synthesize,
                        message: e.to_string(),
                    });
                    (String::new(), Some(Confidence::Low))
                }
            }
        };

        let confidence = assess_confidence(stop, &kept, &answer, model_confidence);

        Ok(Synthesis {
            reasoning_summary: reasoning_summary(trace, degradations.as_slice()),
            answer,
            confidence,
        })
    }
}

fn is_unknown(answer: &str) -> bool {
    let normalized = normalize_answer(answer);
    normalized.is_empty()
        || matches!(
            normalized.as_str(),
            "unknown" | "i dont know" | "not known" | "cannot be determined" | "insufficient evidence"
        )
}

/// All normalized answer tokens occur in some kept evidence text.
fn evidence_names_answer(kept: &[&Evidence], answer: &str) -> bool {
    let tokens = answer_tokens(answer);
    if tokens.is_empty() {
        return false;
    }
    kept.iter().any(|e| {
        let text = normalize_answer(&e.chunk.text);
        let words: Vec<&str> = text.split_whitespace().collect();
        tokens.iter().all(|t| words.contains(&t.as_str()))
    })
}

/// Confidence label from the stop reason, kept evidence and the answer.
pub fn assess_confidence(
    stop: Option<StopReason>,
    kept: &[&Evidence],
    answer: &str,
    model_confidence: Option<Confidence>,
) -> Confidence {
    if kept.is_empty()
        || stop == Some(StopReason::QueryGenerationExhausted)
        || is_unknown(answer)
        || model_confidence == Some(Confidence::Low)
    {
        return Confidence::Low;
    }

    if stop == Some(StopReason::EnoughEvidence) && evidence_names_answer(kept, answer) {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

/// Hop conclusions in order, then the stop reason and any degradations.
pub fn reasoning_summary(trace: &ReasoningTrace, degradations: &[Degradation]) -> String {
    let mut summary = String::new();
    for hop in trace.hops() {
        let _ = writeln!(summary, "Hop {} [{}]: {}", hop.hop, hop.query.text, hop.conclusion);
    }

    if let Some(stop) = trace.stop_decision() {
        if stop.detail.is_empty() {
            let _ = writeln!(summary, "Stopped: {}", stop.reason);
        } else {
            let _ = writeln!(summary, "Stopped: {} ({})", stop.reason, stop.detail);
        }
    }

    for d in degradations {
        let _ = writeln!(summary, "Degraded: {} at hop {}: {}", d.step, d.hop, d.message);
    }

    summary.trim_end().to_string()
}
