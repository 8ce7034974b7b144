//! hop CLI - Ask multi-hop questions and run evaluation experiments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hop_core::{AnswerResult, HopConfig, HopError};
use hop_eval::{
    compare_stored, load_examples, ComparisonReport, EvaluationEngine, ExperimentRecord, ExperimentStore,
    ExperimentSummary,
};
use hop_providers::{ChatReasoner, CorpusRetriever};
use hop_reason::HopController;

type Controller = HopController<CorpusRetriever, ChatReasoner>;

/// hop - Multi-hop question answering over a local passage corpus
#[derive(Parser)]
#[command(name = "hop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/hop-rag/config.toml, then ./hop-rag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question
        question: String,

        /// Maximum number of hops
        #[arg(long)]
        max_hops: Option<u32>,

        /// JSONL passage corpus (default: <data dir>/hop-rag/corpus.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Print the full result, including the trace, as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate against a labelled dataset and record an experiment
    Evaluate {
        /// Dataset file (JSON array or JSONL of {id, question, answer, type?, level?})
        #[arg(short, long)]
        dataset: PathBuf,

        /// Experiment name
        #[arg(short, long)]
        name: String,

        /// Experiment description
        #[arg(long, default_value = "")]
        description: String,

        /// Maximum number of questions to run
        #[arg(long)]
        max_examples: Option<usize>,

        /// Questions answered in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// JSONL passage corpus (default: <data dir>/hop-rag/corpus.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Compare experiments; the first is the baseline
    Compare {
        /// Experiment ids or names
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List recorded experiments, newest first
    List,

    /// Show one experiment
    Show {
        /// Experiment id or name
        id: String,

        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> Result<HopConfig, HopError> {
    match path {
        Some(path) => HopConfig::load(path),
        None => HopConfig::load_default(),
    }
}

fn get_corpus_path(corpus: Option<PathBuf>) -> Result<PathBuf, HopError> {
    if let Some(path) = corpus {
        return Ok(path);
    }

    dirs::data_local_dir()
        .map(|dir| dir.join("hop-rag").join("corpus.jsonl"))
        .ok_or_else(|| HopError::config("Could not determine data directory; pass --corpus"))
}

fn build_controller(config: &HopConfig, corpus: Option<PathBuf>) -> Result<Controller, HopError> {
    let corpus_path = get_corpus_path(corpus)?;
    if !corpus_path.exists() {
        return Err(HopError::config(format!(
            "Corpus not found at {}; pass --corpus <file.jsonl>",
            corpus_path.display()
        )));
    }

    let retriever = CorpusRetriever::from_jsonl(&corpus_path)?;
    if retriever.is_empty() {
        warn!("Corpus {} has no passages", corpus_path.display());
    }

    let reasoner = ChatReasoner::from_env(config.provider.clone())?;
    Ok(HopController::new(
        Arc::new(retriever),
        Arc::new(reasoner),
        config.clone(),
    ))
}

async fn compare_experiments(dir: &Path, ids: &[String]) -> Result<ComparisonReport, HopError> {
    let store = ExperimentStore::open(dir)?;
    let report = compare_stored(&store, ids).await?;
    store.close()?;
    Ok(report)
}

async fn list_experiments(dir: &Path) -> Result<Vec<ExperimentSummary>, HopError> {
    let store = ExperimentStore::open(dir)?;
    let summaries = store.list().await?;
    store.close()?;
    Ok(summaries)
}

async fn show_experiment(dir: &Path, id: &str) -> Result<ExperimentRecord, HopError> {
    let store = ExperimentStore::open(dir)?;
    let record = store
        .find(id)
        .await?
        .ok_or_else(|| HopError::ExperimentNotFound { id: id.to_string() })?;
    store.close()?;
    Ok(record)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    debug!("Experiments dir: {}", config.evaluation.experiments_dir.display());

    match cli.command {
        Commands::Ask {
            question,
            max_hops,
            corpus,
            json,
        } => {
            let controller = build_controller(&config, corpus)?;
            let max_hops = max_hops.unwrap_or(config.controller.max_hops);
            let result = controller.ask(&question, max_hops).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_answer(&result);
            }
            if result.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Evaluate {
            dataset,
            name,
            description,
            max_examples,
            concurrency,
            corpus,
        } => {
            let examples = load_examples(&dataset)?;
            let controller = Arc::new(build_controller(&config, corpus)?);
            let store = Arc::new(ExperimentStore::open(&config.evaluation.experiments_dir)?);

            let mut engine = EvaluationEngine::new(controller, store.clone());
            if let Some(concurrency) = concurrency {
                engine = engine.with_concurrency(concurrency);
            }

            let token = engine.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling: waiting for in-flight questions...");
                    token.cancel();
                }
            });

            println!(
                "Evaluating {} question(s) from {}...",
                max_examples
                    .unwrap_or(config.evaluation.max_examples)
                    .min(examples.len()),
                dataset.display()
            );
            let id = engine
                .evaluate(&examples, &name, &description, max_examples)
                .await?;
            let record = engine.show(&id).await?;
            drop(engine);

            print_experiment(&record);

            if let Ok(store) = Arc::try_unwrap(store) {
                store.close()?;
            }
        }
        Commands::Compare { ids } => {
            let report = compare_experiments(&config.evaluation.experiments_dir, &ids).await?;
            print_comparison(&report);
        }
        Commands::List => {
            print_list(&list_experiments(&config.evaluation.experiments_dir).await?);
        }
        Commands::Show { id, json } => {
            let record = show_experiment(&config.evaluation.experiments_dir, &id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_experiment(&record);
            }
        }
    }

    Ok(())
}

fn print_answer(result: &AnswerResult) {
    if let Some(error) = &result.error {
        eprintln!("Error: {}", error);
    }

    let answer = if result.answer.is_empty() {
        "(no answer)"
    } else {
        result.answer.as_str()
    };
    println!("Answer: {}", answer);
    println!("Confidence: {}", result.confidence);
    println!(
        "Hops: {} ({})  Time: {}ms",
        result.hop_count,
        result
            .stop_reason()
            .map(|r| r.as_str())
            .unwrap_or("not finished"),
        result.processing_time_ms
    );

    if !result.reasoning_summary.is_empty() {
        println!("\nReasoning:");
        for line in result.reasoning_summary.lines() {
            println!("  {}", line);
        }
    }
}

fn print_experiment(record: &ExperimentRecord) {
    let m = &record.metrics;
    println!("\n{}", "=".repeat(60));
    println!("Experiment: {} ({})", record.name, record.id);
    if !record.description.is_empty() {
        println!("{}", record.description);
    }
    if record.cancelled {
        println!("(cancelled before all questions ran)");
    }
    println!("{}", "=".repeat(60));
    println!("Overall:");
    println!("  Exact Match: {:.3}", m.overall.exact_match);
    println!("  F1 Score:    {:.3}", m.overall.f1);
    println!("  Examples:    {} ({} errors)", m.overall.count, m.errors);
    println!(
        "  Speed:       {:.1} q/sec, {:.0}ms mean latency",
        m.questions_per_second, m.overall.mean_latency_ms
    );

    for (grouping, keys) in &m.by_group {
        println!("\nBy {}:", grouping);
        for (key, agg) in keys {
            println!(
                "  {}: EM={:.3}, F1={:.3} (n={})",
                key, agg.exact_match, agg.f1, agg.count
            );
        }
    }

    if !record.failures.is_empty() {
        println!("\nLowest-scoring answers:");
        for r in &record.failures {
            println!(
                "  [{}] F1={:.2} predicted {:?}, expected {:?}",
                r.id, r.f1, r.prediction, r.gold
            );
        }
    }
    println!("{}\n", "=".repeat(60));
}

fn print_list(summaries: &[ExperimentSummary]) {
    if summaries.is_empty() {
        println!("No experiments recorded.");
        return;
    }

    for s in summaries {
        println!(
            "{}  {}  EM={:.3} F1={:.3} n={}{}",
            s.id,
            s.name,
            s.overall.exact_match,
            s.overall.f1,
            s.overall.count,
            if s.cancelled { " (cancelled)" } else { "" }
        );
        if !s.description.is_empty() {
            println!("    {}", s.description);
        }
    }
}

fn print_comparison(report: &ComparisonReport) {
    println!("\n{}", "=".repeat(60));
    println!("Experiment comparison (baseline: {})", report.baseline);
    println!("{}", "=".repeat(60));

    for e in &report.experiments {
        println!(
            "  {}: EM={:.3} ({:+.3}), F1={:.3} ({:+.3}), latency={:.0}ms ({:+.0}ms), n={}",
            e.name,
            e.overall.exact_match,
            e.delta.exact_match,
            e.overall.f1,
            e.delta.f1,
            e.overall.mean_latency_ms,
            e.delta.mean_latency_ms,
            e.overall.count
        );
    }

    let mut current = "";
    for row in &report.groups {
        if row.grouping != current {
            current = row.grouping.as_str();
            println!("\nBy {}:", current);
        }
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| match cell {
                Some(c) => match c.delta {
                    Some(d) => format!("EM={:.3} ({:+.3}) n={}", c.aggregate.exact_match, d.exact_match, c.aggregate.count),
                    None => format!("EM={:.3} n={}", c.aggregate.exact_match, c.aggregate.count),
                },
                None => "-".to_string(),
            })
            .collect();
        println!("  {}: {}", row.key, cells.join(" | "));
    }
    println!("{}\n", "=".repeat(60));
}
