//! Batch evaluation of the hop controller against labelled questions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hop_core::{
    now_millis, AnswerResult, Confidence, EvaluationConfig, HopError, ReasoningPort, Result,
    RetrievalPort,
};
use hop_reason::HopController;

use crate::compare::{compare_stored, ComparisonReport};
use crate::metrics::{exact_match, f1, Aggregate};
use crate::record::{
    new_experiment_id, EvalExample, ExperimentRecord, ExperimentSummary, Metrics, QuestionResult,
};
use crate::store::ExperimentStore;

/// Group key used when a result has no value for a grouping.
pub const UNKNOWN_GROUP: &str = "unknown";

type GroupKeyFn = dyn Fn(&QuestionResult) -> Option<String> + Send + Sync;

/// A named way of bucketing results for per-group aggregates.
#[derive(Clone)]
pub struct Grouping {
    pub name: String,
    key: Arc<GroupKeyFn>,
}

impl Grouping {
    pub fn new<F>(name: impl Into<String>, key: F) -> Self
    where
        F: Fn(&QuestionResult) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: Arc::new(key),
        }
    }

    /// Question category, reported as `type`.
    pub fn by_category() -> Self {
        Self::new("type", |r| r.category.clone())
    }

    /// Question difficulty, reported as `level`.
    pub fn by_difficulty() -> Self {
        Self::new("level", |r| r.difficulty.clone())
    }

    pub fn key_of(&self, result: &QuestionResult) -> String {
        (self.key)(result).unwrap_or_else(|| UNKNOWN_GROUP.to_string())
    }
}

impl fmt::Debug for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grouping").field("name", &self.name).finish()
    }
}

fn default_groupings() -> Vec<Grouping> {
    vec![Grouping::by_category(), Grouping::by_difficulty()]
}

/// Overall and per-group aggregates for a set of results.
pub fn compute_metrics(results: &[QuestionResult], groupings: &[Grouping], elapsed: Duration) -> Metrics {
    let scores = |r: &QuestionResult| (r.exact_match, r.f1, r.latency_ms);

    let mut by_group = BTreeMap::new();
    for grouping in groupings {
        let mut buckets: BTreeMap<String, Vec<(f64, f64, u64)>> = BTreeMap::new();
        for result in results {
            buckets.entry(grouping.key_of(result)).or_default().push(scores(result));
        }
        let aggregates: BTreeMap<String, Aggregate> = buckets
            .into_iter()
            .map(|(key, s)| (key, Aggregate::from_scores(s)))
            .collect();
        by_group.insert(grouping.name.clone(), aggregates);
    }

    let elapsed_seconds = elapsed.as_secs_f64();
    Metrics {
        overall: Aggregate::from_scores(results.iter().map(scores)),
        by_group,
        errors: results.iter().filter(|r| r.error.is_some()).count(),
        elapsed_seconds,
        questions_per_second: if elapsed_seconds > 0.0 {
            results.len() as f64 / elapsed_seconds
        } else {
            0.0
        },
    }
}

/// Results with F1 below `threshold`, lowest first, at most `max`.
pub fn analyze_failures(results: &[QuestionResult], threshold: f64, max: usize) -> Vec<QuestionResult> {
    let mut failures: Vec<QuestionResult> = results.iter().filter(|r| r.f1 < threshold).cloned().collect();
    failures.sort_by(|a, b| a.f1.partial_cmp(&b.f1).unwrap_or(std::cmp::Ordering::Equal));
    failures.truncate(max);
    failures
}

/// Score a controller answer against its example.
pub fn score_answer(example: &EvalExample, answer: AnswerResult) -> QuestionResult {
    QuestionResult {
        id: example.id.clone(),
        question: example.question.clone(),
        exact_match: exact_match(&answer.answer, &example.answer),
        f1: f1(&answer.answer, &example.answer),
        gold: example.answer.clone(),
        category: example.category.clone(),
        difficulty: example.difficulty.clone(),
        confidence: answer.confidence,
        hop_count: answer.hop_count,
        stop_reason: answer.stop_reason(),
        queries: answer.queries,
        latency_ms: answer.processing_time_ms,
        error: answer.error,
        prediction: answer.answer,
    }
}

fn failed_task(example: &EvalExample, message: String) -> QuestionResult {
    QuestionResult {
        id: example.id.clone(),
        question: example.question.clone(),
        prediction: String::new(),
        gold: example.answer.clone(),
        exact_match: 0.0,
        f1: f1("", &example.answer),
        category: example.category.clone(),
        difficulty: example.difficulty.clone(),
        confidence: Confidence::Low,
        hop_count: 0,
        queries: Vec::new(),
        stop_reason: None,
        latency_ms: 0,
        error: Some(message),
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop starting new questions; in-flight ones still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs labelled questions through a controller and records experiments.
pub struct EvaluationEngine<R: RetrievalPort + ?Sized, M: ReasoningPort + ?Sized> {
    controller: Arc<HopController<R, M>>,
    store: Arc<ExperimentStore>,
    config: EvaluationConfig,
    groupings: Vec<Grouping>,
    cancel: CancelToken,
}

impl<R, M> EvaluationEngine<R, M>
where
    R: RetrievalPort + ?Sized + 'static,
    M: ReasoningPort + ?Sized + 'static,
{
    pub fn new(controller: Arc<HopController<R, M>>, store: Arc<ExperimentStore>) -> Self {
        let config = controller.config().evaluation.clone();
        Self {
            controller,
            store,
            config,
            groupings: default_groupings(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the default `type` and `level` groupings.
    pub fn with_groupings(mut self, groupings: Vec<Grouping>) -> Self {
        self.groupings = groupings;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    /// Token that cancels runs started by this engine.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &ExperimentStore {
        &self.store
    }

    /// Evaluate up to `max_examples` questions (config default when `None`)
    /// and persist the run. Returns the experiment id.
    ///
    /// Individual question failures are recorded in the results; only
    /// persistence errors fail the run.
    pub async fn evaluate(
        &self,
        examples: &[EvalExample],
        name: &str,
        description: &str,
        max_examples: Option<usize>,
    ) -> Result<String> {
        if name.trim().is_empty() {
            return Err(HopError::invalid_argument("experiment name is empty"));
        }

        let limit = max_examples.unwrap_or(self.config.max_examples).min(examples.len());
        let examples = &examples[..limit];
        let max_hops = self.controller.config().controller.max_hops;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        info!(
            "Evaluating {} questions as {:?} (concurrency {})",
            examples.len(),
            name,
            self.config.concurrency
        );

        let started = Instant::now();
        let mut handles: Vec<(&EvalExample, JoinHandle<QuestionResult>)> = Vec::with_capacity(examples.len());
        let mut cancelled = false;

        for example in examples {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| HopError::internal(format!("worker pool closed: {}", e)))?;

            if self.cancel.is_cancelled() {
                warn!("Evaluation cancelled after {} of {} questions", handles.len(), examples.len());
                cancelled = true;
                break;
            }

            let controller = self.controller.clone();
            let owned = example.clone();
            handles.push((
                example,
                tokio::spawn(async move {
                    let answer = controller.ask(&owned.question, max_hops).await;
                    drop(permit);
                    score_answer(&owned, answer)
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (example, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => failed_task(example, format!("evaluation task failed: {}", e)),
            };
            debug!(
                "{}: EM={:.0} F1={:.3} ({} hops)",
                result.id, result.exact_match, result.f1, result.hop_count
            );
            results.push(result);
        }

        let metrics = compute_metrics(&results, &self.groupings, started.elapsed());
        let failures = analyze_failures(
            &results,
            self.config.failure_threshold,
            self.config.max_failures_reported,
        );

        let record = ExperimentRecord {
            id: new_experiment_id(name),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now_millis(),
            config: serde_json::to_value(self.controller.config())?,
            metrics,
            results,
            failures,
            cancelled,
        };

        self.store.save(&record).await?;

        info!(
            "Experiment {}: EM={:.3} F1={:.3} over {} questions ({:.1} q/s)",
            record.id,
            record.metrics.overall.exact_match,
            record.metrics.overall.f1,
            record.metrics.overall.count,
            record.metrics.questions_per_second
        );
        Ok(record.id)
    }

    /// Compare stored experiments by id or name; the first is the baseline.
    pub async fn compare(&self, ids: &[String]) -> Result<ComparisonReport> {
        compare_stored(&self.store, ids).await
    }

    /// Stored experiments, newest first.
    pub async fn list(&self) -> Result<Vec<ExperimentSummary>> {
        self.store.list().await
    }

    /// Full record for an id or name.
    pub async fn show(&self, id: &str) -> Result<ExperimentRecord> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| HopError::ExperimentNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hop_core::{HopConfig, PromptMode, ScoredPassage};
    use hop_providers::{ScriptedReasoner, StaticRetriever};
    use tempfile::TempDir;

    const LAGAAN_Q: &str = "What nationality is the director of Lagaan?";

    fn engine(dir: &TempDir) -> EvaluationEngine<StaticRetriever, ScriptedReasoner> {
        let retriever = StaticRetriever::new().with(
            "Lagaan director",
            vec![ScoredPassage::new(
                "Lagaan was directed by Ashutosh Gowariker, an Indian film director.",
                "Lagaan",
                0.8,
            )],
        );
        let reasoner = ScriptedReasoner::new()
            .on(PromptMode::Decompose, "Lagaan", "Lagaan director")
            .default_reply(PromptMode::RelevanceScore, "0.9")
            .default_reply(PromptMode::HopConclusion, "The director is Indian.")
            .default_reply(PromptMode::StopDecision, "sufficient: yes\nconfidence: high")
            .default_reply(PromptMode::Synthesize, "answer: Indian\nconfidence: high");

        let mut config = HopConfig::default();
        config.controller.retry_backoff_ms = 1;
        config.evaluation.concurrency = 2;

        let controller = Arc::new(HopController::new(Arc::new(retriever), Arc::new(reasoner), config));
        let store = Arc::new(ExperimentStore::open(dir.path()).unwrap());
        EvaluationEngine::new(controller, store)
    }

    fn examples() -> Vec<EvalExample> {
        vec![
            EvalExample::new("1", LAGAAN_Q, "Indian")
                .with_category("bridge")
                .with_difficulty("hard"),
            EvalExample::new("2", "Who wrote Hamlet?", "William Shakespeare").with_category("bridge"),
            EvalExample::new("3", LAGAAN_Q, "India").with_category("comparison"),
        ]
    }

    fn result(id: &str, em: f64, f1: f64, category: Option<&str>) -> QuestionResult {
        QuestionResult {
            id: id.to_string(),
            question: "q".to_string(),
            prediction: "p".to_string(),
            gold: "g".to_string(),
            exact_match: em,
            f1,
            category: category.map(str::to_string),
            difficulty: None,
            confidence: Confidence::Medium,
            hop_count: 1,
            queries: Vec::new(),
            stop_reason: None,
            latency_ms: 10,
            error: None,
        }
    }

    #[test]
    fn test_compute_metrics_groups_unknown_keys() {
        let results = vec![
            result("a", 1.0, 1.0, Some("bridge")),
            result("b", 0.0, 0.5, Some("bridge")),
            result("c", 0.0, 0.0, None),
        ];
        let metrics = compute_metrics(&results, &default_groupings(), Duration::from_secs(2));

        assert_eq!(metrics.overall.count, 3);
        assert!((metrics.overall.f1 - 0.5).abs() < 1e-9);
        assert!((metrics.questions_per_second - 1.5).abs() < 1e-9);
        assert_eq!(metrics.by_group["type"]["bridge"].count, 2);
        assert_eq!(metrics.by_group["type"][UNKNOWN_GROUP].count, 1);
        assert_eq!(metrics.by_group["level"][UNKNOWN_GROUP].count, 3);
    }

    #[test]
    fn test_analyze_failures_sorted_and_capped() {
        let results = vec![
            result("a", 0.0, 0.2, None),
            result("b", 1.0, 1.0, None),
            result("c", 0.0, 0.0, None),
            result("d", 0.0, 0.1, None),
        ];
        let failures = analyze_failures(&results, 0.3, 2);
        let ids: Vec<&str> = failures.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn test_custom_grouping() {
        let hops = Grouping::new("hops", |r: &QuestionResult| Some(r.hop_count.to_string()));
        let metrics = compute_metrics(&[result("a", 1.0, 1.0, None)], &[hops], Duration::ZERO);
        assert_eq!(metrics.by_group["hops"]["1"].count, 1);
        assert_eq!(metrics.questions_per_second, 0.0);
    }

    #[tokio::test]
    async fn test_evaluate_persists_ordered_results() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let id = engine.evaluate(&examples(), "baseline", "three questions", None).await.unwrap();
        let record = engine.show(&id).await.unwrap();

        assert_eq!(record.name, "baseline");
        assert!(!record.cancelled);
        let ids: Vec<&str> = record.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        assert_eq!(record.results[0].exact_match, 1.0);
        assert_eq!(record.results[0].prediction, "Indian");
        assert_eq!(record.results[1].prediction, "");
        assert_eq!(record.results[1].f1, 0.0);
        assert_eq!(record.results[2].exact_match, 0.0);

        assert_eq!(record.metrics.overall.count, 3);
        assert_eq!(record.metrics.by_group["type"]["bridge"].count, 2);
        assert_eq!(record.metrics.by_group["level"]["hard"].count, 1);
        assert_eq!(record.metrics.by_group["level"][UNKNOWN_GROUP].count, 2);
        assert_eq!(record.config["controller"]["max_hops"], 3);

        let failure_ids: Vec<&str> = record.failures.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(failure_ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_max_examples_limits_run() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let id = engine.evaluate(&examples(), "small", "", Some(1)).await.unwrap();
        assert_eq!(engine.show(&id).await.unwrap().results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_marked_and_saved() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.cancel_token().cancel();

        let id = engine.evaluate(&examples(), "stopped", "", None).await.unwrap();
        let record = engine.show(&id).await.unwrap();
        assert!(record.cancelled);
        assert!(record.results.is_empty());
        assert_eq!(record.metrics.overall.count, 0);
    }

    /// Holds the first completion until released, then answers from `inner`.
    struct GatedReasoner {
        inner: ScriptedReasoner,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        gated: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ReasoningPort for GatedReasoner {
        async fn complete(&self, prompt: &hop_core::Prompt) -> Result<hop_core::Completion> {
            if !self.gated.swap(true, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.inner.complete(prompt).await
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_records_in_flight_question() {
        let dir = TempDir::new().unwrap();
        let retriever = StaticRetriever::new().with(
            "Lagaan director",
            vec![ScoredPassage::new("Lagaan was directed by an Indian director.", "Lagaan", 0.8)],
        );
        let reasoner = Arc::new(GatedReasoner {
            inner: ScriptedReasoner::new()
                .on(PromptMode::Decompose, "Lagaan", "Lagaan director")
                .default_reply(PromptMode::RelevanceScore, "0.9")
                .default_reply(PromptMode::HopConclusion, "The director is Indian.")
                .default_reply(PromptMode::StopDecision, "sufficient: yes\nconfidence: high")
                .default_reply(PromptMode::Synthesize, "answer: Indian\nconfidence: high"),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            gated: AtomicBool::new(false),
        });

        let mut config = HopConfig::default();
        config.controller.retry_backoff_ms = 1;
        config.evaluation.concurrency = 1;
        let controller = Arc::new(HopController::new(Arc::new(retriever), reasoner.clone(), config));
        let store = Arc::new(ExperimentStore::open(dir.path()).unwrap());
        let engine = EvaluationEngine::new(controller, store);
        let token = engine.cancel_token();

        let exs = examples();
        let run = engine.evaluate(&exs, "interrupted", "", None);
        let interrupt = async {
            reasoner.started.notified().await;
            token.cancel();
            reasoner.release.notify_one();
        };
        let (id, ()) = tokio::join!(run, interrupt);

        let record = engine.show(&id.unwrap()).await.unwrap();
        assert!(record.cancelled);
        assert_eq!(record.results.len(), 1);
        assert_eq!(record.results[0].id, "1");
        assert_eq!(record.results[0].prediction, "Indian");
        assert_eq!(record.metrics.overall.count, 1);
    }

    #[tokio::test]
    async fn test_compare_by_name_and_list() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let first = engine.evaluate(&examples(), "baseline", "", Some(1)).await.unwrap();
        let second = engine.evaluate(&examples(), "full", "", None).await.unwrap();

        let report = engine
            .compare(&["baseline".to_string(), second.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(report.baseline, first);
        assert_eq!(report.experiments.len(), 2);
        assert_eq!(report.experiments[0].delta.exact_match, 0.0);
        // baseline 1/1 correct, full 1/3 correct
        assert!((report.experiments[1].delta.exact_match + 2.0 / 3.0).abs() < 1e-9);

        let listed = engine.list().await.unwrap();
        assert_eq!(listed.len(), 2);

        assert!(matches!(
            engine.compare(&["missing".to_string()]).await,
            Err(HopError::ExperimentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(matches!(
            engine.evaluate(&examples(), " ", "", None).await,
            Err(HopError::InvalidArgument { .. })
        ));
    }
}
