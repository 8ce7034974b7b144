//! In-memory lexical retriever over a JSONL passage corpus.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use hop_core::{HopError, Result, RetrievalPort, ScoredPassage};

/// BM25 term-frequency saturation.
const BM25_K1: f32 = 1.2;

/// BM25 length normalization.
const BM25_B: f32 = 0.75;

/// One corpus line: `{"id": "...", "title": "...", "text": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusPassage {
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    pub text: String,
}

impl CorpusPassage {
    fn display_text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{}: {}", title, self.text),
            _ => self.text.clone(),
        }
    }
}

struct IndexedPassage {
    id: String,
    text: String,
    term_freqs: HashMap<String, u32>,
    length: usize,
}

/// BM25 retriever over passages held in memory.
///
/// Ties are broken by corpus order so results are deterministic.
pub struct CorpusRetriever {
    passages: Vec<IndexedPassage>,
    doc_freqs: HashMap<String, usize>,
    avg_length: f32,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl CorpusRetriever {
    /// Build an index from passages.
    pub fn new(passages: Vec<CorpusPassage>) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut indexed = Vec::with_capacity(passages.len());

        for passage in passages {
            let text = passage.display_text();
            let tokens = tokenize(&text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_default() += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
            indexed.push(IndexedPassage {
                id: passage.id,
                text,
                term_freqs,
                length: tokens.len(),
            });
        }

        let total: usize = indexed.iter().map(|p| p.length).sum();
        let avg_length = if indexed.is_empty() {
            0.0
        } else {
            total as f32 / indexed.len() as f32
        };

        Self {
            passages: indexed,
            doc_freqs,
            avg_length,
        }
    }

    /// Load a JSONL corpus file (blank lines ignored).
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut passages = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let passage: CorpusPassage = serde_json::from_str(line).map_err(|e| {
                HopError::invalid_argument(format!(
                    "{}:{}: invalid corpus line: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            passages.push(passage);
        }

        info!("Loaded {} passages from {:?}", passages.len(), path);
        Ok(Self::new(passages))
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.passages.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, passage: &IndexedPassage, terms: &[String]) -> f32 {
        let length_norm = if self.avg_length > 0.0 {
            passage.length as f32 / self.avg_length
        } else {
            1.0
        };

        terms
            .iter()
            .map(|term| {
                let tf = passage.term_freqs.get(term).copied().unwrap_or(0) as f32;
                if tf == 0.0 {
                    return 0.0;
                }
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_norm);
                self.idf(term) * tf * (BM25_K1 + 1.0) / denom
            })
            .sum()
    }
}

#[async_trait]
impl RetrievalPort for CorpusRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let mut scored: Vec<(usize, f32)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(idx, p)| (idx, self.score(p, &terms)))
            .filter(|(_, score)| score.is_finite() && *score > 0.0)
            .collect();

        // Stable sort keeps corpus order for equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!("Corpus search {:?} matched {} passages", query, scored.len());

        // Scores leave as a fraction of the best match, within 0..=1.
        let top = scored.first().map(|(_, score)| *score).unwrap_or(1.0);
        Ok(scored
            .into_iter()
            .map(|(idx, score)| {
                let passage = &self.passages[idx];
                ScoredPassage::new(passage.text.clone(), passage.id.clone(), score / top)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn passage(id: &str, title: &str, text: &str) -> CorpusPassage {
        CorpusPassage {
            id: id.to_string(),
            title: Some(title.to_string()),
            text: text.to_string(),
        }
    }

    fn corpus() -> CorpusRetriever {
        CorpusRetriever::new(vec![
            passage(
                "lagaan",
                "Lagaan",
                "Lagaan is a 2001 Indian sports drama film written and directed by Ashutosh Gowariker.",
            ),
            passage(
                "gowariker",
                "Ashutosh Gowariker",
                "Ashutosh Gowariker is an Indian film director, actor, writer and producer.",
            ),
            passage("cricket", "Cricket", "Cricket is a bat-and-ball game."),
        ])
    }

    #[tokio::test]
    async fn test_ranks_matching_passage_first() {
        let retriever = corpus();
        let hits = retriever.search("Ashutosh Gowariker nationality", 5).await.unwrap();
        assert_eq!(hits[0].source_id, "gowariker");
        assert!(hits.iter().all(|h| h.source_id != "cricket"));
    }

    #[tokio::test]
    async fn test_scores_are_relative_to_best_match() {
        let retriever = CorpusRetriever::new(vec![
            passage("noise", "Cricket", "cricket cricket cricket cricket bat ball"),
            passage("good", "Lagaan", "Lagaan is a film about cricket."),
        ]);
        let hits = retriever.search("cricket", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_id, "noise");
        assert_eq!(hits[0].score, 1.0);
        assert!(hits[1].score > 0.0 && hits[1].score < 1.0);
    }

    #[tokio::test]
    async fn test_respects_k_and_unknown_terms() {
        let retriever = corpus();
        assert_eq!(retriever.search("Indian", 1).await.unwrap().len(), 1);
        assert!(retriever.search("zebra", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let retriever = corpus();
        let a = retriever.search("Indian film", 5).await.unwrap();
        let b = retriever.search("Indian film", 5).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "text": "first passage"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": "b", "title": "B", "text": "second"}}"#).unwrap();

        let retriever = CorpusRetriever::from_jsonl(file.path()).unwrap();
        assert_eq!(retriever.len(), 2);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "not json").unwrap();
        assert!(matches!(
            CorpusRetriever::from_jsonl(bad.path()),
            Err(HopError::InvalidArgument { .. })
        ));
    }
}
