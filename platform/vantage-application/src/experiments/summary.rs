use crate::experiments::params::ParameterSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use vantage_domain::entities::metrics::Metrics;

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: String,
    pub parameters: ParameterSet,
    pub metrics: Metrics,
    pub score: f64,
    /// 1-based position in the final ranking; 0 until ranked.
    pub rank: usize,
    pub out_of_sample: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<usize>,
}

impl OptimizationResult {
    pub fn new(method: &str, parameters: ParameterSet, metrics: Metrics, score: f64) -> Self {
        Self {
            run_id: format!("{method}__{}", parameters.fingerprint()),
            parameters,
            metrics,
            score,
            rank: 0,
            out_of_sample: false,
            window: None,
            generation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub method: String,
    pub objective: String,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub duration_ms: u64,
    pub best: Option<OptimizationResult>,
    pub top: Vec<OptimizationResult>,
}

/// Sorts descending by score (ties keep evaluation order) and assigns ranks 1..N.
pub fn rank_results(results: &mut [OptimizationResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    for (idx, result) in results.iter_mut().enumerate() {
        result.rank = idx + 1;
    }
}

pub(crate) fn summarize(
    method: &str,
    objective: &str,
    total_runs: usize,
    failed_runs: usize,
    mut results: Vec<OptimizationResult>,
    top_n: usize,
    duration_ms: u64,
) -> OptimizationSummary {
    let successful_runs = total_runs.saturating_sub(failed_runs);
    rank_results(&mut results);
    results.truncate(top_n);
    OptimizationSummary {
        method: method.to_string(),
        objective: objective.to_string(),
        total_runs,
        successful_runs,
        failed_runs,
        duration_ms,
        best: results.first().cloned(),
        top: results,
    }
}
