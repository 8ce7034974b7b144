//! The hop loop: query, retrieve, rank, conclude, decide, synthesize.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use hop_core::{
    normalize_chunk_text, AnswerResult, Confidence, Degradation, Evidence, HopConfig, HopError,
    HopRecord, PipelineStep, Query, Question, ReasoningPort, ReasoningTrace, Result,
    RetrievalPort, RetrievedChunk, StopDecision, StopReason,
};

use crate::call::CallPolicy;
use crate::prompt;
use crate::ranker::ChunkRanker;
use crate::synthesizer::{reasoning_summary, AnswerSynthesizer, Synthesis};

/// Stored when the conclusion call fails.
pub const NO_CONCLUSION: &str = "no conclusion recorded";

const DIRECT_OBJECTIVE: &str = "answer the question directly";
const FOLLOW_UP_OBJECTIVE: &str = "find the information still missing";

/// Inputs to the stop rule for one finished hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSignals {
    pub hop: u32,
    pub max_hops: u32,
    /// The reasoning port judged the evidence sufficient with high confidence.
    pub enough_evidence: bool,
    /// Chunks this hop added that no earlier hop had seen.
    pub new_chunks: usize,
}

/// Decide whether the loop ends after a hop.
///
/// Precedence is fixed: hop cap, then sufficiency, then lack of new evidence.
pub fn decide_stop(signals: &StopSignals) -> Option<StopDecision> {
    if signals.hop >= signals.max_hops {
        return Some(StopDecision::new(
            StopReason::MaxHops,
            format!("reached the limit of {} hops", signals.max_hops),
        ));
    }
    if signals.enough_evidence {
        return Some(StopDecision::new(
            StopReason::EnoughEvidence,
            "evidence judged sufficient with high confidence",
        ));
    }
    if signals.new_chunks == 0 {
        return Some(StopDecision::new(
            StopReason::NoNewEvidence,
            format!("hop {} retrieved nothing new", signals.hop),
        ));
    }
    None
}

enum HopState {
    Init,
    /// The previous hop continues; its record is pushed once the next query exists.
    GenerateQuery { previous: HopRecord },
    Retrieve(Query),
    Rank {
        query: Query,
        retrieved: Vec<RetrievedChunk>,
    },
    Conclude {
        query: Query,
        evidence: Vec<Evidence>,
        new_chunks: usize,
    },
    Decide(HopRecord),
    Synthesize,
}

/// Answers questions by iterating retrieval and reasoning over several hops.
///
/// Ports are shared; every `ask` call owns its own trace, score cache and
/// query queue, so one controller can serve concurrent questions.
pub struct HopController<R: RetrievalPort + ?Sized, M: ReasoningPort + ?Sized> {
    retriever: Arc<R>,
    reasoner: Arc<M>,
    config: HopConfig,
}

impl<R: RetrievalPort + ?Sized, M: ReasoningPort + ?Sized> HopController<R, M> {
    pub fn new(retriever: Arc<R>, reasoner: Arc<M>, config: HopConfig) -> Self {
        Self {
            retriever,
            reasoner,
            config,
        }
    }

    pub fn config(&self) -> &HopConfig {
        &self.config
    }

    /// Answer `question` in at most `max_hops` hops (0 is treated as 1).
    ///
    /// Never fails: unrecoverable problems produce an error result carrying
    /// whatever trace was built.
    pub async fn ask(&self, question: &str, max_hops: u32) -> AnswerResult {
        let started = Instant::now();
        let question = Question::new(question.trim());
        let max_hops = max_hops.max(1);

        if question.is_blank() {
            return error_result(
                ReasoningTrace::new(question),
                Vec::new(),
                &HopError::invalid_argument("question is empty"),
                started,
            );
        }

        info!("Answering (max {} hops): {}", max_hops, question);

        let mut run = QuestionRun::new(self, question, max_hops);
        let outcome = run.drive().await;
        match outcome {
            Ok(synthesis) => {
                let result = run.into_result(synthesis, started);
                info!(
                    "Answered in {} hops ({}, {}): {:?}",
                    result.hop_count,
                    result
                        .stop_reason()
                        .map(|r| r.as_str())
                        .unwrap_or("unfinished"),
                    result.confidence,
                    result.answer
                );
                result
            }
            Err(e) => {
                warn!("Question aborted: {}", e);
                error_result(run.trace, run.degradations, &e, started)
            }
        }
    }
}

fn error_result(
    trace: ReasoningTrace,
    degradations: Vec<Degradation>,
    error: &HopError,
    started: Instant,
) -> AnswerResult {
    AnswerResult {
        question: trace.question().clone(),
        answer: String::new(),
        confidence: Confidence::Low,
        reasoning_summary: reasoning_summary(&trace, &degradations),
        queries: trace.hops().iter().map(|h| h.query.text.clone()).collect(),
        hop_count: trace.len(),
        trace,
        processing_time_ms: started.elapsed().as_millis() as u64,
        degradations,
        error: Some(error.to_string()),
    }
}

/// Per-question state.
struct QuestionRun<'a, R: RetrievalPort + ?Sized, M: ReasoningPort + ?Sized> {
    controller: &'a HopController<R, M>,
    max_hops: u32,
    policy: CallPolicy,
    trace: ReasoningTrace,
    ranker: ChunkRanker<M>,
    /// Decomposed queries not yet issued.
    queue: VecDeque<(String, String)>,
    /// Normalized texts of issued queries.
    issued: HashSet<String>,
    degradations: Vec<Degradation>,
}

impl<'a, R: RetrievalPort + ?Sized, M: ReasoningPort + ?Sized> QuestionRun<'a, R, M> {
    fn new(controller: &'a HopController<R, M>, question: Question, max_hops: u32) -> Self {
        let policy = CallPolicy::from_config(&controller.config.controller);
        Self {
            controller,
            max_hops,
            policy,
            trace: ReasoningTrace::new(question),
            ranker: ChunkRanker::new(
                controller.reasoner.clone(),
                controller.config.ranking.clone(),
                policy,
            ),
            queue: VecDeque::new(),
            issued: HashSet::new(),
            degradations: Vec::new(),
        }
    }

    fn question(&self) -> &Question {
        self.trace.question()
    }

    fn degrade(&mut self, hop: u32, step: PipelineStep, error: &HopError) {
        warn!("Hop {} {} degraded: {}", hop, step, error);
        self.degradations.push(Degradation {
            hop,
            step,
            message: error.to_string(),
        });
    }

    async fn drive(&mut self) -> Result<Synthesis> {
        let mut state = HopState::Init;
        loop {
            state = match state {
                HopState::Init => HopState::Retrieve(self.first_query().await?),
                HopState::GenerateQuery { previous } => self.generate_query(previous).await?,
                HopState::Retrieve(query) => {
                    let retrieved = self.retrieve(&query).await?;
                    HopState::Rank { query, retrieved }
                }
                HopState::Rank { query, retrieved } => {
                    let new_chunks = self.ranker.merge(retrieved);
                    let outcome = self.ranker.rank(self.trace.question()).await?;
                    if outcome.similarity_fallbacks > 0 {
                        let err = HopError::reasoning(format!(
                            "{} chunks ranked by similarity",
                            outcome.similarity_fallbacks
                        ));
                        self.degrade(query.hop, PipelineStep::Rank, &err);
                    }
                    HopState::Conclude {
                        query,
                        evidence: outcome.evidence,
                        new_chunks,
                    }
                }
                HopState::Conclude {
                    query,
                    evidence,
                    new_chunks,
                } => {
                    let conclusion = self.conclude(&query, &evidence).await?;
                    HopState::Decide(HopRecord {
                        hop: query.hop,
                        query,
                        evidence,
                        new_chunks,
                        conclusion,
                        stop: None,
                    })
                }
                HopState::Decide(record) => self.decide(record).await?,
                HopState::Synthesize => {
                    let synthesizer = AnswerSynthesizer::new(self.controller.reasoner.clone(), self.policy);
                    return synthesizer.synthesize(&self.trace, &mut self.degradations).await;
                }
            };
        }
    }

    fn mark_issued(&mut self, text: &str) -> bool {
        self.issued.insert(normalize_chunk_text(text))
    }

    async fn first_query(&mut self) -> Result<Query> {
        if self.controller.config.controller.decompose {
            let request = prompt::decompose(self.question(), self.max_hops);
            let max = self.max_hops as usize;
            match self
                .policy
                .complete(self.controller.reasoner.as_ref(), &request, |text| {
                    prompt::parse_queries(text, max)
                })
                .await
            {
                Ok(queries) => {
                    let total = queries.len();
                    for (i, text) in queries.into_iter().enumerate() {
                        if self.issued.contains(&normalize_chunk_text(&text)) {
                            continue;
                        }
                        self.queue
                            .push_back((text, format!("step {} of {} in the decomposed question", i + 1, total)));
                    }
                    debug!("Decomposed into {} queries", self.queue.len());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.degrade(0, PipelineStep::Decompose, &e),
            }
        }

        let query = match self.queue.pop_front() {
            Some((text, objective)) => Query::new(text, 1).with_objective(objective),
            None => Query::new(self.question().as_str(), 1).with_objective(DIRECT_OBJECTIVE),
        };
        self.mark_issued(&query.text);
        Ok(query)
    }

    async fn generate_query(&mut self, mut previous: HopRecord) -> Result<HopState> {
        let hop = previous.hop + 1;
        match self.next_query(hop, &previous).await? {
            Ok(query) => {
                self.trace.push(previous)?;
                Ok(HopState::Retrieve(query))
            }
            Err(detail) => {
                debug!("Query generation exhausted at hop {}: {}", hop, detail);
                previous.stop = Some(StopDecision::new(StopReason::QueryGenerationExhausted, detail));
                self.trace.push(previous)?;
                Ok(HopState::Synthesize)
            }
        }
    }

    /// Next query for `hop`, or the reason none could be produced.
    async fn next_query(
        &mut self,
        hop: u32,
        previous: &HopRecord,
    ) -> Result<std::result::Result<Query, String>> {
        while let Some((text, objective)) = self.queue.pop_front() {
            if self.mark_issued(&text) {
                return Ok(Ok(Query::new(text, hop).with_objective(objective)));
            }
        }

        let mut conclusions = self.trace.conclusions();
        conclusions.push(previous.conclusion.as_str());
        let request = prompt::follow_up(self.trace.question(), &conclusions);

        let generated = self
            .policy
            .complete(self.controller.reasoner.as_ref(), &request, |text| {
                Ok(prompt::normalize_query(text))
            })
            .await;

        match generated {
            Ok(Some(text)) => {
                if self.mark_issued(&text) {
                    Ok(Ok(Query::new(text, hop).with_objective(FOLLOW_UP_OBJECTIVE)))
                } else {
                    Ok(Err(format!("follow-up query repeated an earlier query: {}", text)))
                }
            }
            Ok(None) => Ok(Err("no follow-up query needed".to_string())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.degrade(hop, PipelineStep::GenerateQuery, &e);
                let raw = self.question().as_str().to_string();
                if self.mark_issued(&raw) {
                    Ok(Ok(Query::new(raw, hop).with_objective(DIRECT_OBJECTIVE)))
                } else {
                    Ok(Err("follow-up generation failed and the question was already searched".to_string()))
                }
            }
        }
    }

    async fn retrieve(&mut self, query: &Query) -> Result<Vec<RetrievedChunk>> {
        let retriever = self.controller.retriever.as_ref();
        let k = self.controller.config.controller.retrieval_k;
        let text = query.text.as_str();

        debug!("Hop {} searching: {}", query.hop, text);
        match self.policy.run("search", || retriever.search(text, k)).await {
            Ok(passages) => Ok(passages
                .into_iter()
                .map(|p| RetrievedChunk {
                    text: p.text,
                    source_id: p.source_id,
                    score: p.score,
                    query: query.text.clone(),
                    hop: query.hop,
                })
                .collect()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.degrade(query.hop, PipelineStep::Retrieve, &e);
                Ok(Vec::new())
            }
        }
    }

    async fn conclude(&mut self, query: &Query, evidence: &[Evidence]) -> Result<String> {
        let kept: Vec<&Evidence> = evidence
            .iter()
            .filter(|e| e.is_kept())
            .take(self.controller.config.controller.conclusion_evidence)
            .collect();
        let conclusions = self.trace.conclusions();
        let request = prompt::hop_conclusion(self.trace.question(), &query.text, &conclusions, &kept);

        match self
            .policy
            .complete(self.controller.reasoner.as_ref(), &request, prompt::parse_conclusion)
            .await
        {
            Ok(conclusion) => Ok(conclusion),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.degrade(query.hop, PipelineStep::Conclude, &e);
                Ok(NO_CONCLUSION.to_string())
            }
        }
    }

    async fn decide(&mut self, mut record: HopRecord) -> Result<HopState> {
        let has_kept = record.kept_evidence().next().is_some();
        let enough_evidence = if record.hop < self.max_hops && has_kept {
            self.check_sufficiency(&record).await?
        } else {
            false
        };

        let signals = StopSignals {
            hop: record.hop,
            max_hops: self.max_hops,
            enough_evidence,
            new_chunks: record.new_chunks,
        };

        match decide_stop(&signals) {
            Some(decision) => {
                debug!("Stopping after hop {}: {}", record.hop, decision.reason);
                record.stop = Some(decision);
                self.trace.push(record)?;
                Ok(HopState::Synthesize)
            }
            None => Ok(HopState::GenerateQuery { previous: record }),
        }
    }

    async fn check_sufficiency(&mut self, record: &HopRecord) -> Result<bool> {
        let mut conclusions = self.trace.conclusions();
        conclusions.push(record.conclusion.as_str());
        let kept: Vec<&Evidence> = record.kept_evidence().collect();
        let request = prompt::stop_check(self.trace.question(), &conclusions, &kept);

        match self
            .policy
            .complete(self.controller.reasoner.as_ref(), &request, prompt::parse_sufficiency)
            .await
        {
            Ok(verdict) => Ok(verdict.is_confident_yes()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.degrade(record.hop, PipelineStep::StopCheck, &e);
                Ok(false)
            }
        }
    }

    fn into_result(self, synthesis: Synthesis, started: Instant) -> AnswerResult {
        AnswerResult {
            question: self.trace.question().clone(),
            answer: synthesis.answer,
            confidence: synthesis.confidence,
            reasoning_summary: synthesis.reasoning_summary,
            queries: self.trace.hops().iter().map(|h| h.query.text.clone()).collect(),
            hop_count: self.trace.len(),
            trace: self.trace,
            processing_time_ms: started.elapsed().as_millis() as u64,
            degradations: self.degradations,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hop_core::{ChunkKey, PromptMode, ScoredPassage};
    use hop_providers::{ScriptedReasoner, StaticRetriever};

    const QUESTION: &str = "What nationality is the director of Lagaan?";
    const LAGAAN: &str =
        "Lagaan is a 2001 Indian sports drama film written and directed by Ashutosh Gowariker.";
    const GOWARIKER: &str = "Ashutosh Gowariker is an Indian film director, actor, writer and producer.";

    fn passage(text: &str, source: &str) -> ScoredPassage {
        ScoredPassage::new(text, source, 0.8)
    }

    fn config() -> HopConfig {
        let mut config = HopConfig::default();
        config.controller.retry_backoff_ms = 1;
        config.controller.call_timeout_ms = 2_000;
        config
    }

    fn controller(
        retriever: StaticRetriever,
        reasoner: ScriptedReasoner,
    ) -> HopController<StaticRetriever, ScriptedReasoner> {
        HopController::new(Arc::new(retriever), Arc::new(reasoner), config())
    }

    fn lagaan() -> HopController<StaticRetriever, ScriptedReasoner> {
        let retriever = StaticRetriever::new()
            .with("Lagaan director", vec![passage(LAGAAN, "Lagaan")])
            .with(
                "Ashutosh Gowariker nationality",
                vec![passage(GOWARIKER, "Ashutosh Gowariker")],
            );
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "Lagaan director")
            .default_reply(PromptMode::RelevanceScore, "0.9")
            .on(PromptMode::HopConclusion, "Indian film director", "Ashutosh Gowariker is Indian.")
            .default_reply(PromptMode::HopConclusion, "Lagaan was directed by Ashutosh Gowariker.")
            .on(
                PromptMode::FollowUpQuery,
                "directed by Ashutosh Gowariker",
                "Ashutosh Gowariker nationality",
            )
            .on(
                PromptMode::StopDecision,
                "Indian film director",
                "sufficient: yes\nconfidence: high",
            )
            .default_reply(PromptMode::StopDecision, "sufficient: no\nconfidence: low")
            .default_reply(PromptMode::Synthesize, "answer: Indian\nconfidence: high");
        controller(retriever, reasoner)
    }

    #[tokio::test]
    async fn test_non_finite_retrieval_scores_do_not_abort() {
        let passages = (0..40)
            .map(|i| {
                let score = if i % 3 == 0 { f32::NAN } else { 0.5 };
                ScoredPassage::new(format!("passage number {i}"), format!("doc-{i}"), score)
            })
            .collect();
        let retriever = StaticRetriever::new().with("What?", passages);
        let mut config = config();
        config.controller.retrieval_k = 40;
        config.ranking.model_scoring = false;
        config.ranking.top_n = 40;
        let controller = HopController::new(
            Arc::new(retriever),
            Arc::new(ScriptedReasoner::new()),
            config,
        );

        let result = controller.ask("What?", 1).await;
        assert!(!result.is_error());
        assert_eq!(result.hop_count, 1);
        let evidence = result.trace.final_evidence();
        assert_eq!(evidence.len(), 40);
        assert!(evidence.iter().all(|e| e.relevance.is_finite()));
        assert_eq!(evidence.iter().filter(|e| e.is_kept()).count(), 26);
    }

    #[test]
    fn test_decide_stop_precedence() {
        let signals = StopSignals {
            hop: 3,
            max_hops: 3,
            enough_evidence: true,
            new_chunks: 0,
        };
        assert_eq!(decide_stop(&signals).unwrap().reason, StopReason::MaxHops);

        let signals = StopSignals { hop: 1, ..signals };
        assert_eq!(decide_stop(&signals).unwrap().reason, StopReason::EnoughEvidence);

        let signals = StopSignals {
            enough_evidence: false,
            ..signals
        };
        assert_eq!(decide_stop(&signals).unwrap().reason, StopReason::NoNewEvidence);

        let signals = StopSignals {
            new_chunks: 2,
            ..signals
        };
        assert!(decide_stop(&signals).is_none());
    }

    #[tokio::test]
    async fn test_lagaan_two_hop_answer() {
        let result = lagaan().ask(QUESTION, 3).await;

        assert!(!result.is_error());
        assert_eq!(result.hop_count, 2);
        assert_eq!(result.answer, "Indian");
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.stop_reason(), Some(StopReason::EnoughEvidence));
        assert_eq!(
            result.queries,
            vec!["Lagaan director", "Ashutosh Gowariker nationality"]
        );
        assert_eq!(
            result.trace.conclusions(),
            vec!["Lagaan was directed by Ashutosh Gowariker.", "Ashutosh Gowariker is Indian."]
        );
        assert!(result.trace.hops()[0].stop.is_none());
        assert!(result.degradations.is_empty());
        assert!(result.reasoning_summary.starts_with("Hop 1 [Lagaan director]"));
    }

    #[tokio::test]
    async fn test_frozen_ports_give_identical_traces() {
        let controller = lagaan();
        let first = controller.ask(QUESTION, 3).await;
        let second = controller.ask(QUESTION, 3).await;

        assert_eq!(first.trace, second.trace);
        assert_eq!(first.answer, second.answer);
        assert_eq!(first.confidence, second.confidence);
    }

    #[tokio::test]
    async fn test_empty_retrieval_stops_with_low_confidence() {
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "Lagaan director")
            .default_reply(PromptMode::HopConclusion, "Nothing was found.")
            .default_reply(PromptMode::Synthesize, "answer: Indian\nconfidence: high");
        let result = controller(StaticRetriever::new(), reasoner).ask(QUESTION, 3).await;

        assert!(!result.is_error());
        assert_eq!(result.hop_count, 1);
        assert_eq!(result.stop_reason(), Some(StopReason::NoNewEvidence));
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.answer, "");
        assert!(result.trace.final_evidence().is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_hop() {
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "Lagaan director")
            .default_reply(PromptMode::HopConclusion, "Nothing was found.");
        let retriever = Arc::new(StaticRetriever::failing());
        let controller = HopController::new(retriever.clone(), Arc::new(reasoner), config());
        let result = controller.ask(QUESTION, 3).await;

        assert!(!result.is_error());
        assert_eq!(result.hop_count, 1);
        assert_eq!(result.stop_reason(), Some(StopReason::NoNewEvidence));
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(retriever.calls(), 2);
        assert!(result
            .degradations
            .iter()
            .any(|d| d.step == PipelineStep::Retrieve && d.hop == 1));
    }

    #[tokio::test]
    async fn test_hops_are_bounded_and_contiguous() {
        let retriever = StaticRetriever::new()
            .with("first query", vec![passage("Alpha passage.", "a")])
            .with("second query", vec![passage("Beta passage.", "b")])
            .with("third query", vec![passage("Gamma passage.", "c")]);
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "first query\nsecond query\nthird query")
            .default_reply(PromptMode::RelevanceScore, "0.7")
            .default_reply(PromptMode::HopConclusion, "Partial finding.")
            .default_reply(PromptMode::StopDecision, "sufficient: no")
            .default_reply(PromptMode::Synthesize, "answer: Alpha\nconfidence: medium");
        let controller = controller(retriever, reasoner);

        let result = controller.ask(QUESTION, 2).await;
        assert_eq!(result.hop_count, 2);
        let indices: Vec<u32> = result.trace.hops().iter().map(|h| h.hop).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(result.stop_reason(), Some(StopReason::MaxHops));
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(
            result.trace.hops().iter().filter(|h| h.stop.is_some()).count(),
            1
        );

        let result = controller.ask(QUESTION, 0).await;
        assert_eq!(result.hop_count, 1);
        assert_eq!(result.stop_reason(), Some(StopReason::MaxHops));
    }

    #[tokio::test]
    async fn test_same_text_from_two_hops_is_one_evidence_entry() {
        let retriever = StaticRetriever::new()
            .with("q one", vec![passage("Shared passage text.", "a")])
            .with(
                "q two",
                vec![
                    passage("shared   PASSAGE text.", "b"),
                    passage("Fresh passage.", "c"),
                ],
            );
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "q one\nq two")
            .default_reply(PromptMode::RelevanceScore, "0.6")
            .default_reply(PromptMode::HopConclusion, "Something.")
            .default_reply(PromptMode::StopDecision, "sufficient: no")
            .default_reply(PromptMode::FollowUpQuery, "DONE")
            .default_reply(PromptMode::Synthesize, "answer: Something");
        let result = controller(retriever, reasoner).ask(QUESTION, 3).await;

        assert_eq!(result.hop_count, 2);
        assert_eq!(result.trace.hops()[1].new_chunks, 1);
        let evidence = result.trace.final_evidence();
        assert_eq!(evidence.len(), 2);
        let keys: HashSet<ChunkKey> = evidence.iter().map(|e| e.chunk.key()).collect();
        assert_eq!(keys.len(), 2);
        // first occurrence keeps its metadata
        assert_eq!(evidence[0].chunk.source_id, "a");
        assert_eq!(evidence[0].chunk.hop, 1);
    }

    #[tokio::test]
    async fn test_done_follow_up_exhausts_queries() {
        let retriever = StaticRetriever::new().with("Lagaan director", vec![passage(LAGAAN, "Lagaan")]);
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::Decompose, "Lagaan director")
            .default_reply(PromptMode::RelevanceScore, "0.9")
            .default_reply(PromptMode::HopConclusion, "Lagaan was directed by Ashutosh Gowariker.")
            .default_reply(PromptMode::StopDecision, "sufficient: no\nconfidence: low")
            .default_reply(PromptMode::FollowUpQuery, "DONE")
            .default_reply(PromptMode::Synthesize, "answer: Indian\nconfidence: high");
        let result = controller(retriever, reasoner).ask(QUESTION, 3).await;

        assert_eq!(result.hop_count, 1);
        assert_eq!(result.stop_reason(), Some(StopReason::QueryGenerationExhausted));
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.answer, "Indian");
    }

    #[tokio::test]
    async fn test_failed_decomposition_uses_raw_question() {
        let retriever = StaticRetriever::new().with(QUESTION, vec![passage(LAGAAN, "Lagaan")]);
        let reasoner = ScriptedReasoner::new()
            .default_reply(PromptMode::RelevanceScore, "0.9")
            .default_reply(PromptMode::HopConclusion, "Lagaan was directed by Ashutosh Gowariker.")
            .default_reply(PromptMode::StopDecision, "sufficient: no")
            .fail(PromptMode::FollowUpQuery)
            .default_reply(PromptMode::Synthesize, "answer: Ashutosh Gowariker");
        let result = controller(retriever, reasoner).ask(QUESTION, 3).await;

        assert_eq!(result.queries, vec![QUESTION]);
        assert_eq!(
            result.trace.hops()[0].query.objective.as_deref(),
            Some(DIRECT_OBJECTIVE)
        );
        assert_eq!(result.stop_reason(), Some(StopReason::QueryGenerationExhausted));
        let steps: Vec<PipelineStep> = result.degradations.iter().map(|d| d.step).collect();
        assert_eq!(steps, vec![PipelineStep::Decompose, PipelineStep::GenerateQuery]);
    }

    #[tokio::test]
    async fn test_unauthenticated_reasoner_yields_error_result() {
        let retriever = StaticRetriever::new().with("Lagaan director", vec![passage(LAGAAN, "Lagaan")]);
        let result = controller(retriever, ScriptedReasoner::new().unauthenticated())
            .ask(QUESTION, 3)
            .await;

        assert!(result.is_error());
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.hop_count, 0);
        assert_eq!(result.answer, "");
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let result = lagaan().ask("   ", 3).await;
        assert!(result.is_error());
        assert_eq!(result.hop_count, 0);
        assert!(result.trace.is_empty());
    }
}
