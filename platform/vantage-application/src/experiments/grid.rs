use crate::backtesting::SeriesMap;
use crate::experiments::error::OptimizeError;
use crate::experiments::params::{expand_grid, validate_params, ParameterDef, ParameterSet};
use crate::experiments::pool::should_cancelled;
use crate::experiments::summary::{summarize, OptimizationResult, OptimizationSummary};
use crate::experiments::{evaluate_batch, SearchContext};
use std::time::Instant;
use tracing::{info, info_span};

pub const METHOD: &str = "grid";

/// Exhaustive search over the Cartesian product of the parameter domains.
#[derive(Debug, Clone)]
pub struct GridSearch {
    params: Vec<ParameterDef>,
}

/// Successful results plus the number of candidates that were dropped.
pub(crate) struct GridOutcome {
    pub total_runs: usize,
    pub failed_runs: usize,
    pub results: Vec<OptimizationResult>,
}

impl GridSearch {
    pub fn new(params: Vec<ParameterDef>) -> Result<Self, OptimizeError> {
        validate_params(&params).map_err(OptimizeError::InvalidParameter)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &[ParameterDef] {
        &self.params
    }

    pub fn combinations(&self) -> Result<Vec<ParameterSet>, OptimizeError> {
        expand_grid(&self.params).map_err(OptimizeError::InvalidParameter)
    }

    pub fn run(&self, ctx: &SearchContext<'_>) -> Result<OptimizationSummary, OptimizeError> {
        self.run_with_cancel(ctx, None)
    }

    pub fn run_with_cancel(
        &self,
        ctx: &SearchContext<'_>,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<OptimizationSummary, OptimizeError> {
        let _span = info_span!(
            "grid_search",
            objective = %ctx.objective.name(),
            parallelism = ctx.parallelism
        )
        .entered();
        ctx.validate()?;

        let started = Instant::now();
        let outcome = self.search(ctx, METHOD, ctx.series, should_cancel)?;
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("vantage.optimizer.run_ms", "method" => METHOD)
            .record(duration_ms as f64);
        info!(
            total_runs = outcome.total_runs,
            failed_runs = outcome.failed_runs,
            duration_ms,
            "grid search finished"
        );

        Ok(summarize(
            METHOD,
            ctx.objective.name(),
            outcome.total_runs,
            outcome.failed_runs,
            outcome.results,
            ctx.top_n,
            duration_ms,
        ))
    }

    /// Evaluates every combination on `series`; failed candidates are counted and dropped.
    /// `method` labels the candidate counters and result ids.
    pub(crate) fn search(
        &self,
        ctx: &SearchContext<'_>,
        method: &'static str,
        series: &SeriesMap,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<GridOutcome, OptimizeError> {
        if should_cancelled(should_cancel) {
            return Err(OptimizeError::Cancelled);
        }
        let combinations = self.combinations()?;
        let outcomes = evaluate_batch(ctx, method, series, &combinations, should_cancel)?;

        let total_runs = combinations.len();
        let mut results = Vec::with_capacity(total_runs);
        let mut failed_runs = 0usize;
        for (params, outcome) in combinations.into_iter().zip(outcomes) {
            match outcome {
                Ok((metrics, score)) => {
                    results.push(OptimizationResult::new(method, params, metrics, score));
                }
                Err(_) => failed_runs += 1,
            }
        }
        Ok(GridOutcome {
            total_runs,
            failed_runs,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::builtin_factory;
    use crate::experiments::objective::ObjectiveKind;
    use crate::experiments::params::{ParamKind, ParamValue};
    use vantage_domain::value_objects::bar::Bar;

    fn series(closes: &[f64]) -> SeriesMap {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                instrument: "BTCUSD".to_string(),
                timestamp: i as i64 * 3_600,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
            })
            .collect();
        SeriesMap::from([("BTCUSD".to_string(), bars)])
    }

    fn uptrend() -> SeriesMap {
        series(&(0..40).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let err = GridSearch::new(vec![
            ParameterDef::int_range("short_window", 2, 4, 1),
            ParameterDef::int_range("short_window", 5, 6, 1),
        ])
        .unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidParameter(_)));
    }

    #[test]
    fn runs_every_combination_and_ranks() {
        let data = uptrend();
        let grid = GridSearch::new(vec![
            ParameterDef::int_range("short_window", 2, 4, 1),
            ParameterDef::int_range("long_window", 10, 20, 5),
        ])
        .unwrap();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::TotalReturn)
            .with_parallelism(3);
        let summary = grid.run(&ctx).unwrap();
        assert_eq!(summary.method, "grid");
        assert_eq!(summary.objective, "total_return");
        assert_eq!(summary.total_runs, 9);
        assert_eq!(summary.failed_runs, 0);
        assert_eq!(summary.top.len(), 9);
        let best = summary.best.unwrap();
        assert_eq!(best.rank, 1);
        assert!(summary.top.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn failing_combinations_are_dropped() {
        let data = uptrend();
        // short >= long fails in the factory for two of the four combinations.
        let grid = GridSearch::new(vec![
            ParameterDef::choices(
                "short_window",
                ParamKind::Int,
                vec![ParamValue::Int(3), ParamValue::Int(12)],
            ),
            ParameterDef::choices(
                "long_window",
                ParamKind::Int,
                vec![ParamValue::Int(10), ParamValue::Int(12)],
            ),
        ])
        .unwrap();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::Sharpe);
        let summary = grid.run(&ctx).unwrap();
        assert_eq!(summary.total_runs, 4);
        assert_eq!(summary.failed_runs, 2);
        assert_eq!(summary.successful_runs, 2);
        assert_eq!(summary.top.len(), 2);
    }

    #[test]
    fn cancelled_before_start() {
        let data = uptrend();
        let grid = GridSearch::new(vec![ParameterDef::int_range("short_window", 2, 4, 1)]).unwrap();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::Sharpe);
        let cancel = || true;
        assert_eq!(
            grid.run_with_cancel(&ctx, Some(&cancel)).unwrap_err(),
            OptimizeError::Cancelled
        );
    }

    #[test]
    fn empty_definition_list_runs_defaults_once() {
        let data = uptrend();
        let grid = GridSearch::new(Vec::new()).unwrap();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::Sharpe);
        let summary = grid.run(&ctx).unwrap();
        assert_eq!(summary.total_runs, 1);
    }
}
