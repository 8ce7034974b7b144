//! hop-eval - Evaluation engine and experiment store
//!
//! This crate scores the hop controller against labelled questions (exact
//! match and token F1), aggregates results overall and per group, and keeps
//! each run as a JSON experiment record that can be listed, shown and
//! compared against a baseline.

mod compare;
mod engine;
mod metrics;
mod record;
mod store;

pub use compare::{
    compare_records, compare_stored, ComparisonReport, ExperimentComparison, GroupCell,
    GroupComparison, MetricDelta,
};
pub use engine::{
    analyze_failures, compute_metrics, score_answer, CancelToken, EvaluationEngine, Grouping,
    UNKNOWN_GROUP,
};
pub use metrics::{exact_match, f1, Aggregate};
pub use record::{
    load_examples, new_experiment_id, EvalExample, ExperimentRecord, ExperimentSummary, Metrics,
    QuestionResult,
};
pub use store::ExperimentStore;
