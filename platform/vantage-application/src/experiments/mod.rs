//! Parameter searches over repeated, independent backtests.

pub mod error;
pub mod factory;
pub mod genetic;
pub mod grid;
pub mod objective;
pub mod params;
pub mod pool;
pub mod summary;
pub mod walk_forward;

use crate::backtesting::{evaluate, SeriesMap};
use error::OptimizeError;
use objective::{sanitize_score, Objective};
use params::ParameterSet;
use pool::run_bounded;
use summary::DEFAULT_TOP_N;
use tracing::warn;
use vantage_domain::entities::metrics::{Metrics, MetricsConfig};
use vantage_domain::services::engine::EngineConfig;
use vantage_domain::services::strategy::SignalSource;

/// Builds a fresh signal source for one candidate.
pub type StrategyFactory<'a> =
    dyn Fn(&ParameterSet) -> Result<Box<dyn SignalSource>, String> + Sync + 'a;

/// Factory over the built-in strategies (see [`factory::build_strategy`]).
pub fn builtin_factory(params: &ParameterSet) -> Result<Box<dyn SignalSource>, String> {
    let strategy = factory::build_strategy(params)?;
    Ok(Box::new(strategy))
}

/// Inputs shared by every candidate of a search. Each candidate still gets its own engine.
pub struct SearchContext<'a> {
    pub series: &'a SeriesMap,
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
    pub factory: &'a StrategyFactory<'a>,
    pub objective: &'a dyn Objective,
    pub parallelism: usize,
    pub top_n: usize,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        series: &'a SeriesMap,
        factory: &'a StrategyFactory<'a>,
        objective: &'a dyn Objective,
    ) -> Self {
        Self {
            series,
            engine: EngineConfig::default(),
            metrics: MetricsConfig::default(),
            factory,
            objective,
            parallelism: 1,
            top_n: DEFAULT_TOP_N,
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OptimizeError> {
        if self.series.is_empty() || self.series.values().all(|bars| bars.is_empty()) {
            return Err(OptimizeError::EmptyData);
        }
        self.engine.validate()?;
        Ok(())
    }
}

pub(crate) type CandidateOutcome = Result<(Metrics, f64), String>;

/// Factory, backtest and scoring for one parameter set.
pub(crate) fn evaluate_candidate(
    ctx: &SearchContext<'_>,
    series: &SeriesMap,
    params: &ParameterSet,
) -> CandidateOutcome {
    let mut source = (ctx.factory)(params).map_err(|err| format!("factory: {err}"))?;
    let metrics = evaluate(ctx.engine, ctx.metrics, series, source.as_mut())
        .map_err(|err| err.to_string())?;
    let score = sanitize_score(ctx.objective.score(&metrics));
    Ok((metrics, score))
}

/// Evaluates every candidate on the bounded pool, in input order. Failures are logged and
/// returned as `Err` entries; only cancellation aborts the batch.
pub(crate) fn evaluate_batch(
    ctx: &SearchContext<'_>,
    method: &'static str,
    series: &SeriesMap,
    candidates: &[ParameterSet],
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<Vec<CandidateOutcome>, OptimizeError> {
    let outcomes = run_bounded(candidates, ctx.parallelism, should_cancel, |params| {
        evaluate_candidate(ctx, series, params)
    })?;

    for (params, outcome) in candidates.iter().zip(&outcomes) {
        match outcome {
            Ok(_) => {
                metrics::counter!("vantage.optimizer.candidates_total", "method" => method, "result" => "ok")
                    .increment(1);
            }
            Err(err) => {
                metrics::counter!("vantage.optimizer.candidates_total", "method" => method, "result" => "error")
                    .increment(1);
                warn!(method, params = %params, error = %err, "candidate failed");
            }
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::objective::ObjectiveKind;
    use crate::experiments::params::ParamValue;
    use vantage_domain::value_objects::bar::Bar;

    fn series() -> SeriesMap {
        let bars = [100.0, 101.0, 103.0, 102.0]
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                instrument: "BTCUSD".to_string(),
                timestamp: i as i64 * 60,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
            })
            .collect();
        SeriesMap::from([("BTCUSD".to_string(), bars)])
    }

    #[test]
    fn candidate_errors_are_reported_per_item() {
        let data = series();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::TotalReturn);
        let candidates = vec![
            ParameterSet::new().with("strategy", ParamValue::Str("buy_and_hold".to_string())),
            ParameterSet::new().with("strategy", ParamValue::Str("nope".to_string())),
        ];
        let outcomes = evaluate_batch(&ctx, "test", &data, &candidates, None).unwrap();
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].as_ref().unwrap_err().contains("nope"));
    }

    #[test]
    fn context_rejects_empty_data_and_bad_engine() {
        let empty = SeriesMap::new();
        let ctx = SearchContext::new(&empty, &builtin_factory, &ObjectiveKind::Sharpe);
        assert_eq!(ctx.validate(), Err(OptimizeError::EmptyData));

        let data = series();
        let ctx = SearchContext::new(&data, &builtin_factory, &ObjectiveKind::Sharpe).with_engine(
            EngineConfig {
                initial_capital: -1.0,
                ..EngineConfig::default()
            },
        );
        assert!(matches!(ctx.validate(), Err(OptimizeError::Engine(_))));
    }
}
