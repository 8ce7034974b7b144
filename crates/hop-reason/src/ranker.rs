//! Evidence ranking over the chunks seen in one trace.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use hop_core::{
    ChunkKey, Evidence, Judgment, Question, RankingConfig, ReasoningPort, Result, RetrievedChunk,
    ScoreSource,
};

use crate::call::CallPolicy;
use crate::prompt;

/// Ranked evidence plus how many chunks fell back to similarity scores.
#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub evidence: Vec<Evidence>,
    pub similarity_fallbacks: usize,
}

/// Retriever similarity mapped into the 0..=1 relevance range; non-finite
/// scores count as irrelevant.
fn similarity(chunk: &RetrievedChunk) -> f32 {
    if chunk.score.is_finite() {
        chunk.score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Deduplicating, relevance-ordered pool of retrieved chunks.
///
/// One ranker lives for one trace; model scores are cached by chunk key
/// because relevance is always judged against the same question. Chunks the
/// model judged rank ahead of chunks that fell back to similarity.
pub struct ChunkRanker<M: ReasoningPort + ?Sized> {
    reasoner: Arc<M>,
    config: RankingConfig,
    policy: CallPolicy,
    pool: Vec<RetrievedChunk>,
    seen: HashSet<ChunkKey>,
    scores: HashMap<ChunkKey, f32>,
}

impl<M: ReasoningPort + ?Sized> ChunkRanker<M> {
    pub(crate) fn new(reasoner: Arc<M>, config: RankingConfig, policy: CallPolicy) -> Self {
        Self {
            reasoner,
            config,
            policy,
            pool: Vec::new(),
            seen: HashSet::new(),
            scores: HashMap::new(),
        }
    }

    /// Add chunks to the pool, returning how many were not already present.
    pub fn merge(&mut self, chunks: Vec<RetrievedChunk>) -> usize {
        let mut added = 0;
        for chunk in chunks {
            if self.seen.insert(chunk.key()) {
                self.pool.push(chunk);
                added += 1;
            }
        }
        added
    }

    /// Number of distinct chunks seen so far.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Rank the whole pool against `question`.
    ///
    /// Only fatal reasoning errors are returned; any other scoring failure
    /// falls back to the chunk's similarity score.
    pub async fn rank(&mut self, question: &Question) -> Result<RankOutcome> {
        let mut scored: Vec<(f32, ScoreSource, &RetrievedChunk)> = Vec::with_capacity(self.pool.len());
        let mut similarity_fallbacks = 0;

        for chunk in &self.pool {
            if !self.config.model_scoring {
                scored.push((similarity(chunk), ScoreSource::Similarity, chunk));
                continue;
            }

            let key = chunk.key();
            if let Some(&score) = self.scores.get(&key) {
                scored.push((score, ScoreSource::Model, chunk));
                continue;
            }

            let request = prompt::relevance(question, &chunk.text);
            match self
                .policy
                .complete(self.reasoner.as_ref(), &request, prompt::parse_relevance)
                .await
            {
                Ok(score) => {
                    self.scores.insert(key, score);
                    scored.push((score, ScoreSource::Model, chunk));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Relevance scoring failed for {}: {}", chunk.source_id, e);
                    similarity_fallbacks += 1;
                    scored.push((similarity(chunk), ScoreSource::Similarity, chunk));
                }
            }
        }

        // Stable: ties keep pool order, which is hop order then discovery order.
        scored.sort_by(|a, b| {
            let judged = |s: ScoreSource| s == ScoreSource::Model;
            judged(b.1).cmp(&judged(a.1)).then_with(|| b.0.total_cmp(&a.0))
        });
        scored.truncate(self.config.top_n);

        let evidence: Vec<Evidence> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (relevance, score_source, chunk))| Evidence {
                chunk: chunk.clone(),
                rank: i as u32 + 1,
                relevance,
                score_source,
                judgment: if relevance >= self.config.keep_threshold {
                    Judgment::Kept
                } else {
                    Judgment::Discarded
                },
            })
            .collect();

        debug!(
            "Ranked {} of {} chunks ({} kept)",
            evidence.len(),
            self.pool.len(),
            evidence.iter().filter(|e| e.is_kept()).count()
        );

        Ok(RankOutcome {
            evidence,
            similarity_fallbacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hop_core::{ControllerConfig, PromptMode};
    use hop_providers::ScriptedReasoner;

    fn chunk(text: &str, score: f32, hop: u32) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            source_id: format!("doc-{hop}"),
            score,
            query: format!("query {hop}"),
            hop,
        }
    }

    fn ranker(reasoner: ScriptedReasoner, config: RankingConfig) -> ChunkRanker<ScriptedReasoner> {
        let mut controller = ControllerConfig::default();
        controller.retry_backoff_ms = 1;
        ChunkRanker::new(Arc::new(reasoner), config, CallPolicy::from_config(&controller))
    }

    #[test]
    fn test_merge_deduplicates_normalized_text() {
        let mut ranker = ranker(ScriptedReasoner::new(), RankingConfig::default());
        assert_eq!(ranker.merge(vec![chunk("Lagaan is a film.", 0.5, 1)]), 1);
        assert_eq!(
            ranker.merge(vec![
                chunk("lagaan  IS a film.", 0.9, 2),
                chunk("Gowariker is a director.", 0.4, 2),
            ]),
            1
        );
        assert_eq!(ranker.pool_len(), 2);
        assert_eq!(ranker.pool[0].hop, 1);
    }

    #[tokio::test]
    async fn test_rank_orders_by_model_score_and_caches() {
        let reasoner = ScriptedReasoner::new()
            .on(PromptMode::RelevanceScore, "Passage: alpha", "0.2")
            .on(PromptMode::RelevanceScore, "Passage: beta", "0.8");
        let mut ranker = ranker(reasoner, RankingConfig::default());
        ranker.merge(vec![chunk("alpha", 0.9, 1), chunk("beta", 0.1, 1)]);

        let question = Question::new("which?");
        let outcome = ranker.rank(&question).await.unwrap();
        assert_eq!(outcome.evidence[0].chunk.text, "beta");
        assert_eq!(outcome.evidence[0].rank, 1);
        assert!(outcome.evidence[0].is_kept());
        assert_eq!(outcome.evidence[1].judgment, Judgment::Discarded);
        assert_eq!(outcome.similarity_fallbacks, 0);

        ranker.rank(&question).await.unwrap();
        assert_eq!(ranker.reasoner.calls(PromptMode::RelevanceScore), 2);
    }

    #[tokio::test]
    async fn test_rank_falls_back_to_similarity() {
        let reasoner = ScriptedReasoner::new().fail(PromptMode::RelevanceScore);
        let mut ranker = ranker(reasoner, RankingConfig::default());
        ranker.merge(vec![chunk("alpha", 0.2, 1), chunk("beta", 0.7, 1)]);

        let outcome = ranker.rank(&Question::new("which?")).await.unwrap();
        assert_eq!(outcome.similarity_fallbacks, 2);
        assert_eq!(outcome.evidence[0].chunk.text, "beta");
        assert_eq!(outcome.evidence[0].score_source, ScoreSource::Similarity);
    }

    #[tokio::test]
    async fn test_failed_judgment_ranks_below_model_scores() {
        let reasoner = ScriptedReasoner::new()
            .fail_on(PromptMode::RelevanceScore, "cricket cricket")
            .default_reply(PromptMode::RelevanceScore, "0.95");
        let mut ranker = ranker(reasoner, RankingConfig::default());
        ranker.merge(vec![
            chunk("cricket cricket cricket bat", 1.0, 1),
            chunk("Lagaan is a film about cricket.", 0.4, 1),
        ]);

        let outcome = ranker.rank(&Question::new("Who directed Lagaan?")).await.unwrap();
        assert_eq!(outcome.similarity_fallbacks, 1);
        assert_eq!(outcome.evidence[0].chunk.text, "Lagaan is a film about cricket.");
        assert_eq!(outcome.evidence[0].score_source, ScoreSource::Model);
        assert_eq!(outcome.evidence[1].score_source, ScoreSource::Similarity);
        assert!(outcome.evidence[1].relevance <= 1.0);
    }

    #[tokio::test]
    async fn test_non_finite_similarity_ranks_last() {
        let config = RankingConfig {
            model_scoring: false,
            top_n: 100,
            ..RankingConfig::default()
        };
        let mut ranker = ranker(ScriptedReasoner::new(), config);
        let chunks = (0..60)
            .map(|i| {
                let score = match i % 3 {
                    0 => f32::NAN,
                    1 => f32::INFINITY,
                    _ => 0.5,
                };
                chunk(&format!("passage {i}"), score, 1)
            })
            .collect();
        ranker.merge(chunks);

        let outcome = ranker.rank(&Question::new("q")).await.unwrap();
        assert_eq!(outcome.evidence.len(), 60);
        assert!(outcome.evidence.iter().all(|e| (0.0..=1.0).contains(&e.relevance)));
        assert_eq!(outcome.evidence[0].relevance, 0.5);
        assert_eq!(outcome.evidence[59].relevance, 0.0);
    }

    #[tokio::test]
    async fn test_ties_prefer_earlier_hops_and_cap() {
        let config = RankingConfig {
            top_n: 2,
            model_scoring: false,
            ..RankingConfig::default()
        };
        let mut ranker = ranker(ScriptedReasoner::new(), config);
        ranker.merge(vec![chunk("first", 0.5, 1)]);
        ranker.merge(vec![chunk("second", 0.5, 2), chunk("third", 0.5, 2)]);

        let outcome = ranker.rank(&Question::new("q")).await.unwrap();
        let texts: Vec<_> = outcome.evidence.iter().map(|e| e.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_fatal_scoring_error_propagates() {
        let mut ranker = ranker(ScriptedReasoner::new().unauthenticated(), RankingConfig::default());
        ranker.merge(vec![chunk("alpha", 0.2, 1)]);
        let err = ranker.rank(&Question::new("q")).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
