//! Builds the built-in signal sources from a parameter set.
//!
//! The `strategy` key selects the source (`buy_and_hold`, `sma_crossover`, `momentum`,
//! `ensemble`); every other key is a tunable with a default, so a search only has to declare the
//! parameters it actually varies.

use crate::experiments::params::ParameterSet;
use vantage_domain::services::agent::{Agent, MomentumAgent, RsiAgent, SmaTrendAgent};
use vantage_domain::services::consensus::ConsensusStrategy;
use vantage_domain::services::strategy::{
    AgentEnsemble, BuyAndHold, Momentum, SmaCrossover, StrategyKind,
};

pub const DEFAULT_STRATEGY: &str = "sma_crossover";

const DEFAULT_SHORT_WINDOW: i64 = 10;
const DEFAULT_LONG_WINDOW: i64 = 30;
const DEFAULT_LOOKBACK: i64 = 20;
const DEFAULT_THRESHOLD: f64 = 0.02;
const DEFAULT_RSI_WINDOW: i64 = 14;
const DEFAULT_RSI_OVERSOLD: f64 = 30.0;
const DEFAULT_RSI_OVERBOUGHT: f64 = 70.0;

/// Upper bound for any window or lookback, in bars.
pub const MAX_WINDOW: i64 = 1_000_000;

pub fn build_strategy(params: &ParameterSet) -> Result<StrategyKind, String> {
    let name = params.get_str("strategy").unwrap_or(DEFAULT_STRATEGY);
    match name {
        "buy_and_hold" => Ok(StrategyKind::BuyAndHold(BuyAndHold::new())),
        "sma_crossover" => {
            let short = window(params, "short_window", DEFAULT_SHORT_WINDOW)?;
            let long = window(params, "long_window", DEFAULT_LONG_WINDOW)?;
            SmaCrossover::new(short, long).map(StrategyKind::SmaCrossover)
        }
        "momentum" => {
            let lookback = window(params, "lookback", DEFAULT_LOOKBACK)?;
            let threshold = float(params, "threshold", DEFAULT_THRESHOLD)?;
            Momentum::new(lookback, threshold).map(StrategyKind::Momentum)
        }
        "ensemble" => build_ensemble(params).map(StrategyKind::Ensemble),
        other => Err(format!("unknown strategy: {other}")),
    }
}

fn build_ensemble(params: &ParameterSet) -> Result<AgentEnsemble, String> {
    let consensus = match params.get_str("consensus") {
        Some(raw) => raw
            .parse::<ConsensusStrategy>()
            .map_err(|err| err.to_string())?,
        None => ConsensusStrategy::default(),
    };

    let sma_short = window(params, "sma_short", DEFAULT_SHORT_WINDOW)?;
    let sma_long = window(params, "sma_long", DEFAULT_LONG_WINDOW)?;
    if sma_short >= sma_long {
        return Err(format!(
            "sma_short ({sma_short}) must be below sma_long ({sma_long})"
        ));
    }
    let lookback = window(params, "momentum_lookback", DEFAULT_LOOKBACK)?;
    let threshold = float(params, "momentum_threshold", DEFAULT_THRESHOLD)?;
    let rsi_window = window(params, "rsi_window", DEFAULT_RSI_WINDOW)?;
    let oversold = float(params, "rsi_oversold", DEFAULT_RSI_OVERSOLD)?;
    let overbought = float(params, "rsi_overbought", DEFAULT_RSI_OVERBOUGHT)?;
    if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
        return Err(format!(
            "rsi bands must satisfy 0 < oversold < overbought < 100, got {oversold}/{overbought}"
        ));
    }

    let agents: Vec<Box<dyn Agent + Send>> = vec![
        Box::new(SmaTrendAgent::new(sma_short, sma_long)),
        Box::new(MomentumAgent::new(lookback, threshold)),
        Box::new(RsiAgent::new(rsi_window, oversold, overbought)),
    ];
    Ok(AgentEnsemble::new(agents, consensus))
}

fn window(params: &ParameterSet, key: &str, default: i64) -> Result<usize, String> {
    let value = match params.get(key) {
        Some(raw) => raw
            .as_int()
            .ok_or_else(|| format!("{key} must be an integer, got {raw}"))?,
        None => default,
    };
    if value <= 0 {
        return Err(format!("{key} must be positive, got {value}"));
    }
    if value > MAX_WINDOW {
        return Err(format!("{key} exceeds {MAX_WINDOW} bars, got {value}"));
    }
    usize::try_from(value).map_err(|_| format!("{key} is out of range: {value}"))
}

fn float(params: &ParameterSet, key: &str, default: f64) -> Result<f64, String> {
    let value = match params.get(key) {
        Some(raw) => raw
            .as_float()
            .ok_or_else(|| format!("{key} must be numeric, got {raw}"))?,
        None => default,
    };
    if !value.is_finite() {
        return Err(format!("{key} must be finite"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::params::ParamValue;
    use vantage_domain::services::strategy::SignalSource;

    fn params(entries: &[(&str, ParamValue)]) -> ParameterSet {
        entries
            .iter()
            .fold(ParameterSet::new(), |set, (k, v)| set.with(*k, v.clone()))
    }

    #[test]
    fn defaults_to_sma_crossover() {
        let strategy = build_strategy(&ParameterSet::new()).unwrap();
        assert_eq!(strategy.name(), "sma_crossover");
    }

    #[test]
    fn builds_each_named_strategy() {
        for (name, expected) in [
            ("buy_and_hold", "buy_and_hold"),
            ("momentum", "momentum"),
            ("ensemble", "agent_ensemble"),
        ] {
            let strategy =
                build_strategy(&params(&[("strategy", ParamValue::Str(name.to_string()))]))
                    .unwrap();
            assert_eq!(strategy.name(), expected);
        }
    }

    #[test]
    fn rejects_invalid_windows_and_unknown_names() {
        let inverted = params(&[
            ("short_window", ParamValue::Int(30)),
            ("long_window", ParamValue::Int(10)),
        ]);
        assert!(build_strategy(&inverted).is_err());

        let negative = params(&[
            ("strategy", ParamValue::Str("momentum".to_string())),
            ("lookback", ParamValue::Int(-1)),
        ]);
        assert!(build_strategy(&negative).is_err());

        let wrong_type = params(&[("short_window", ParamValue::Str("ten".to_string()))]);
        assert!(build_strategy(&wrong_type).is_err());

        let oversized = params(&[
            ("strategy", ParamValue::Str("ensemble".to_string())),
            ("sma_long", ParamValue::Int(i64::MAX / 2)),
        ]);
        assert!(build_strategy(&oversized).unwrap_err().contains("sma_long"));

        let unknown = params(&[("strategy", ParamValue::Str("martingale".to_string()))]);
        assert!(build_strategy(&unknown).unwrap_err().contains("martingale"));
    }

    #[test]
    fn ensemble_reads_consensus_and_bands() {
        let ok = params(&[
            ("strategy", ParamValue::Str("ensemble".to_string())),
            ("consensus", ParamValue::Str("unanimous".to_string())),
        ]);
        let StrategyKind::Ensemble(ensemble) = build_strategy(&ok).unwrap() else {
            panic!("expected ensemble");
        };
        assert_eq!(ensemble.consensus(), ConsensusStrategy::Unanimous);
        assert_eq!(ensemble.agent_names(), vec!["sma_trend", "momentum", "rsi"]);

        let bad_bands = params(&[
            ("strategy", ParamValue::Str("ensemble".to_string())),
            ("rsi_oversold", ParamValue::Float(80.0)),
        ]);
        assert!(build_strategy(&bad_bands).is_err());

        let bad_consensus = params(&[
            ("strategy", ParamValue::Str("ensemble".to_string())),
            ("consensus", ParamValue::Str("quorum".to_string())),
        ]);
        assert!(build_strategy(&bad_consensus).is_err());
    }
}
