use crate::config::Config;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info_span};
use vantage_domain::entities::metrics::{Metrics, MetricsCalculator, MetricsConfig};
use vantage_domain::error::EngineError;
use vantage_domain::services::engine::{EngineConfig, SimulationEngine};
use vantage_domain::services::strategy::SignalSource;
use vantage_domain::value_objects::bar::Bar;
use vantage_domain::value_objects::date_range::DateRange;
use vantage_domain::value_objects::equity_point::EquityPoint;
use vantage_domain::value_objects::position::ClosedPosition;
use vantage_domain::value_objects::trade::Trade;

/// Bars keyed by instrument.
pub type SeriesMap = BTreeMap<String, Vec<Bar>>;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub run_id: String,
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
    pub range: DateRange,
}

impl BacktestSettings {
    pub fn new(run_id: impl Into<String>, engine: EngineConfig) -> Self {
        Self {
            run_id: run_id.into(),
            engine,
            metrics: MetricsConfig::default(),
            range: DateRange::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, String> {
        Ok(Self {
            run_id: config.run.run_id.clone(),
            engine: config.engine_config()?,
            metrics: config.metrics_config()?,
            range: config.date_range()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub run_id: String,
    pub source: String,
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub closed_positions: Vec<ClosedPosition>,
    pub equity_curve: Vec<EquityPoint>,
}

pub fn run_backtest(
    settings: &BacktestSettings,
    series: &SeriesMap,
    source: &mut dyn SignalSource,
) -> Result<BacktestReport, EngineError> {
    run_backtest_with_cancel(settings, series, source, None)
}

pub fn run_backtest_with_cancel(
    settings: &BacktestSettings,
    series: &SeriesMap,
    source: &mut dyn SignalSource,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<BacktestReport, EngineError> {
    let _span = info_span!(
        "run_backtest",
        run_id = %settings.run_id,
        source = %source.name(),
        instruments = series.len()
    )
    .entered();

    let stage_start = Instant::now();
    let engine = simulate(settings.engine, settings.range, series, source, should_cancel)?;
    let run_ms = stage_start.elapsed().as_millis() as f64;
    metrics::histogram!("vantage.backtest.run_ms").record(run_ms);
    metrics::counter!("vantage.backtest.trades_total").increment(engine.trades().len() as u64);
    metrics::gauge!("vantage.backtest.bars_per_sec").set(if run_ms > 0.0 {
        engine.steps() as f64 / (run_ms / 1000.0)
    } else {
        0.0
    });

    let metrics = MetricsCalculator::new(settings.metrics).calculate(&engine)?;
    debug!(
        steps = engine.steps(),
        trades = engine.trades().len(),
        final_equity = metrics.final_equity,
        run_ms,
        "backtest finished"
    );

    let (trades, closed_positions, equity_curve) = engine.into_parts();
    Ok(BacktestReport {
        run_id: settings.run_id.clone(),
        source: source.name().to_string(),
        metrics,
        trades,
        closed_positions,
        equity_curve,
    })
}

/// Runs one simulation and returns only its metrics. Used by the optimizers, which evaluate
/// thousands of candidates and have no use for the trade log.
pub fn evaluate(
    engine_config: EngineConfig,
    metrics_config: MetricsConfig,
    series: &SeriesMap,
    source: &mut dyn SignalSource,
) -> Result<Metrics, EngineError> {
    let engine = simulate(engine_config, DateRange::default(), series, source, None)?;
    MetricsCalculator::new(metrics_config).calculate(&engine)
}

fn simulate(
    engine_config: EngineConfig,
    range: DateRange,
    series: &SeriesMap,
    source: &mut dyn SignalSource,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<SimulationEngine, EngineError> {
    let mut engine = SimulationEngine::new(engine_config)?;
    for (instrument, bars) in series {
        let bars = if range == DateRange::default() {
            bars.clone()
        } else {
            range.filter(bars)
        };
        engine.load_series(instrument, bars)?;
    }
    engine.run_with_cancel(source, should_cancel)?;
    Ok(engine)
}

/// Restricts every series to `[start, end)`, dropping instruments left empty.
pub fn slice_series(series: &SeriesMap, start: i64, end: i64) -> SeriesMap {
    series
        .iter()
        .filter_map(|(instrument, bars)| {
            let window: Vec<Bar> = bars
                .iter()
                .filter(|bar| bar.timestamp >= start && bar.timestamp < end)
                .cloned()
                .collect();
            (!window.is_empty()).then(|| (instrument.clone(), window))
        })
        .collect()
}

/// Earliest and latest timestamps across all series.
pub fn series_span(series: &SeriesMap) -> Option<(i64, i64)> {
    let timestamps = series.values().flatten().map(|bar| bar.timestamp);
    let first = timestamps.clone().min()?;
    let last = timestamps.max()?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_domain::services::strategy::{BuyAndHold, SmaCrossover};

    fn bar(instrument: &str, ts: i64, close: f64) -> Bar {
        Bar {
            instrument: instrument.to_string(),
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn series(closes: &[f64]) -> SeriesMap {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar("BTCUSD", i as i64 * 86_400, *c))
            .collect();
        SeriesMap::from([("BTCUSD".to_string(), bars)])
    }

    #[test]
    fn report_carries_trades_and_metrics() {
        let settings = BacktestSettings::new("bh", EngineConfig::default());
        let data = series(&[100.0, 105.0, 110.0]);
        let report = run_backtest(&settings, &data, &mut BuyAndHold::new()).unwrap();
        assert_eq!(report.run_id, "bh");
        assert_eq!(report.source, "buy_and_hold");
        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.closed_positions.len(), 1);
        assert_eq!(report.equity_curve.len(), 3);
        assert_eq!(report.metrics.total_trades, 1);
        assert!(report.metrics.total_return > 0.0);
    }

    #[test]
    fn date_range_restricts_loaded_bars() {
        let mut settings = BacktestSettings::new("ranged", EngineConfig::default());
        settings.range = DateRange::new(Some(86_400), Some(2 * 86_400)).unwrap();
        let data = series(&[100.0, 105.0, 110.0, 120.0]);
        let report = run_backtest(&settings, &data, &mut BuyAndHold::new()).unwrap();
        assert_eq!(report.equity_curve.len(), 2);
        assert_eq!(report.trades[0].timestamp, 86_400);
    }

    #[test]
    fn range_excluding_all_bars_is_a_setup_error() {
        let mut settings = BacktestSettings::new("empty", EngineConfig::default());
        settings.range = DateRange::new(Some(1_000_000), None).unwrap();
        let err = run_backtest(&settings, &series(&[1.0, 2.0]), &mut BuyAndHold::new())
            .unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn cancellation_surfaces_as_error() {
        let settings = BacktestSettings::new("c", EngineConfig::default());
        let cancel = || true;
        let err = run_backtest_with_cancel(
            &settings,
            &series(&[1.0, 2.0, 3.0]),
            &mut BuyAndHold::new(),
            Some(&cancel),
        )
        .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn evaluate_matches_full_report_metrics() {
        let data = series(&[10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 9.0, 8.0, 7.0]);
        let settings = BacktestSettings::new("sma", EngineConfig::default());
        let report = run_backtest(&settings, &data, &mut SmaCrossover::new(2, 3).unwrap()).unwrap();
        let metrics = evaluate(
            settings.engine,
            settings.metrics,
            &data,
            &mut SmaCrossover::new(2, 3).unwrap(),
        )
        .unwrap();
        assert_eq!(metrics, report.metrics);
    }

    #[test]
    fn slice_series_is_half_open_and_drops_empty_instruments() {
        let mut data = series(&[1.0, 2.0, 3.0, 4.0]);
        data.insert("ETHUSD".to_string(), vec![bar("ETHUSD", 10 * 86_400, 5.0)]);
        let sliced = slice_series(&data, 86_400, 3 * 86_400);
        assert_eq!(sliced.len(), 1);
        let ts: Vec<i64> = sliced["BTCUSD"].iter().map(|b| b.timestamp).collect();
        assert_eq!(ts, vec![86_400, 2 * 86_400]);
        assert_eq!(series_span(&data), Some((0, 10 * 86_400)));
        assert_eq!(series_span(&SeriesMap::new()), None);
    }
}
