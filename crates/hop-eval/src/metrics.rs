//! Answer scoring and aggregation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hop_core::{answer_tokens, normalize_answer};

/// 1.0 when the normalized answers are identical, else 0.0.
pub fn exact_match(prediction: &str, gold: &str) -> f64 {
    if normalize_answer(prediction) == normalize_answer(gold) {
        1.0
    } else {
        0.0
    }
}

/// Token-level F1 over normalized answers.
///
/// Two empty answers score 1.0; exactly one empty answer scores 0.0.
pub fn f1(prediction: &str, gold: &str) -> f64 {
    let predicted = answer_tokens(prediction);
    let expected = answer_tokens(gold);

    match (predicted.is_empty(), expected.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for token in &expected {
        *remaining.entry(token.as_str()).or_default() += 1;
    }

    let mut common = 0usize;
    for token in &predicted {
        if let Some(count) = remaining.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                common += 1;
            }
        }
    }

    if common == 0 {
        return 0.0;
    }

    let precision = common as f64 / predicted.len() as f64;
    let recall = common as f64 / expected.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Mean scores over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub count: usize,
    pub exact_match: f64,
    pub f1: f64,
    pub mean_latency_ms: f64,
}

impl Aggregate {
    /// Aggregate `(exact_match, f1, latency_ms)` triples.
    pub fn from_scores<I>(scores: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64, u64)>,
    {
        let mut agg = Self::default();
        let (mut em_sum, mut f1_sum, mut latency_sum) = (0.0, 0.0, 0.0);
        for (e, f, l) in scores {
            agg.count += 1;
            em_sum += e;
            f1_sum += f;
            latency_sum += l as f64;
        }

        if agg.count > 0 {
            let n = agg.count as f64;
            agg.exact_match = em_sum / n;
            agg.f1 = f1_sum / n;
            agg.mean_latency_ms = latency_sum / n;
        }
        agg
    }
}
