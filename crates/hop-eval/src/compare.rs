//! Side-by-side comparison of experiments against a baseline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hop_core::{HopError, Result};

use crate::metrics::Aggregate;
use crate::record::ExperimentRecord;
use crate::store::ExperimentStore;

/// Metric differences relative to the baseline (this minus baseline).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub exact_match: f64,
    pub f1: f64,
    pub mean_latency_ms: f64,
}

impl MetricDelta {
    pub fn between(value: &Aggregate, baseline: &Aggregate) -> Self {
        Self {
            exact_match: value.exact_match - baseline.exact_match,
            f1: value.f1 - baseline.f1,
            mean_latency_ms: value.mean_latency_ms - baseline.mean_latency_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentComparison {
    pub id: String,
    pub name: String,
    pub overall: Aggregate,
    pub delta: MetricDelta,
    pub cancelled: bool,
}

/// One experiment's aggregate for a group key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCell {
    pub aggregate: Aggregate,

    /// Present when the baseline also has this key.
    pub delta: Option<MetricDelta>,
}

/// A group key row, one cell per experiment in report order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub grouping: String,
    pub key: String,
    pub cells: Vec<Option<GroupCell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Id of the first experiment.
    pub baseline: String,
    pub experiments: Vec<ExperimentComparison>,
    pub groups: Vec<GroupComparison>,
}

/// Compare records against the first one.
///
/// Group rows cover the union of grouping names and keys across all records.
pub fn compare_records(records: &[ExperimentRecord]) -> ComparisonReport {
    let Some(baseline) = records.first() else {
        return ComparisonReport {
            baseline: String::new(),
            experiments: Vec::new(),
            groups: Vec::new(),
        };
    };

    let experiments = records
        .iter()
        .map(|r| ExperimentComparison {
            id: r.id.clone(),
            name: r.name.clone(),
            overall: r.metrics.overall,
            delta: MetricDelta::between(&r.metrics.overall, &baseline.metrics.overall),
            cancelled: r.cancelled,
        })
        .collect();

    let rows: BTreeSet<(&str, &str)> = records
        .iter()
        .flat_map(|r| {
            r.metrics.by_group.iter().flat_map(|(grouping, keys)| {
                keys.keys().map(move |key| (grouping.as_str(), key.as_str()))
            })
        })
        .collect();

    let lookup = |record: &ExperimentRecord, grouping: &str, key: &str| {
        record
            .metrics
            .by_group
            .get(grouping)
            .and_then(|keys| keys.get(key))
            .copied()
    };

    let groups = rows
        .into_iter()
        .map(|(grouping, key)| {
            let base = lookup(baseline, grouping, key);
            let cells = records
                .iter()
                .map(|r| {
                    lookup(r, grouping, key).map(|aggregate| GroupCell {
                        delta: base.as_ref().map(|b| MetricDelta::between(&aggregate, b)),
                        aggregate,
                    })
                })
                .collect();
            GroupComparison {
                grouping: grouping.to_string(),
                key: key.to_string(),
                cells,
            }
        })
        .collect();

    ComparisonReport {
        baseline: baseline.id.clone(),
        experiments,
        groups,
    }
}

/// Resolve ids or names in `store` and compare them, first as baseline.
///
/// Unmatched entries are skipped with a warning.
pub async fn compare_stored(store: &ExperimentStore, ids: &[String]) -> Result<ComparisonReport> {
    if ids.is_empty() {
        return Err(HopError::invalid_argument("no experiments to compare"));
    }

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match store.find(id).await? {
            Some(record) => records.push(record),
            None => warn!("No experiment found matching: {}", id),
        }
    }

    if records.is_empty() {
        return Err(HopError::ExperimentNotFound { id: ids.join(", ") });
    }
    Ok(compare_records(&records))
}
