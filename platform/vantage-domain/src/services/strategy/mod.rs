mod ensemble;

pub use ensemble::AgentEnsemble;

use crate::services::engine::SimulationEngine;
use crate::services::features::lookback_return;
use crate::value_objects::bar::Bar;
use crate::value_objects::side::SignalSide;
use crate::value_objects::signal::Signal;
use std::collections::BTreeSet;

/// Produces the signals the engine executes at each step. The engine is passed in explicitly on
/// every call, so implementations hold only their own indicator state.
pub trait SignalSource {
    fn name(&self) -> &str;

    fn initialize(&mut self, _engine: &SimulationEngine) -> Result<(), String> {
        Ok(())
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String>;

    fn finalize(&mut self, _engine: &SimulationEngine) -> Result<(), String> {
        Ok(())
    }
}

/// Instruments whose latest bar was consumed on the current step. Stale bars from misaligned
/// series are left out so a source never reacts to the same bar twice.
pub fn fresh_bars(engine: &SimulationEngine) -> impl Iterator<Item = &Bar> {
    let now = engine.current_time();
    engine
        .instruments()
        .filter_map(move |instrument| engine.current_bar(instrument))
        .filter(move |bar| Some(bar.timestamp) == now)
}

/// Buys every instrument once, on its first bar, and holds to the end.
#[derive(Debug, Default)]
pub struct BuyAndHold {
    bought: BTreeSet<String>,
}

impl BuyAndHold {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalSource for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn initialize(&mut self, _engine: &SimulationEngine) -> Result<(), String> {
        self.bought.clear();
        Ok(())
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String> {
        let mut signals = Vec::new();
        for bar in fresh_bars(engine) {
            if self.bought.insert(bar.instrument.clone()) {
                signals.push(
                    Signal::buy(bar.timestamp, bar.instrument.clone(), self.name())
                        .with_rationale("initial entry"),
                );
            }
        }
        Ok(signals)
    }
}

/// Long while the short moving average is above the long one.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    short_window: usize,
    long_window: usize,
}

impl SmaCrossover {
    pub fn new(short_window: usize, long_window: usize) -> Result<Self, String> {
        if short_window == 0 || long_window == 0 {
            return Err("sma windows must be positive".to_string());
        }
        if short_window >= long_window {
            return Err(format!(
                "short window ({short_window}) must be below long window ({long_window})"
            ));
        }
        Ok(Self {
            short_window,
            long_window,
        })
    }

    fn sma(closes: &[f64], window: usize) -> Option<f64> {
        if closes.len() < window {
            return None;
        }
        let slice = &closes[closes.len() - window..];
        Some(slice.iter().sum::<f64>() / window as f64)
    }
}

impl SignalSource for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String> {
        let mut signals = Vec::new();
        for bar in fresh_bars(engine) {
            let history = engine.history(&bar.instrument);
            if history.len() < self.long_window {
                continue;
            }
            let closes: Vec<f64> = history[history.len() - self.long_window..]
                .iter()
                .map(|b| b.close)
                .collect();
            let (Some(short), Some(long)) = (
                Self::sma(&closes, self.short_window),
                Self::sma(&closes, self.long_window),
            ) else {
                continue;
            };

            let holding = engine.position(&bar.instrument).is_some();
            let side = if short > long && !holding {
                SignalSide::Buy
            } else if short < long && holding {
                SignalSide::Sell
            } else {
                continue;
            };
            let spread = if long > 0.0 { (short - long) / long } else { 0.0 };
            signals.push(Signal::new(
                bar.timestamp,
                bar.instrument.clone(),
                side,
                (spread.abs() * 50.0).min(1.0),
                format!("sma{}={short:.4} sma{}={long:.4}", self.short_window, self.long_window),
                self.name(),
            ));
        }
        Ok(signals)
    }
}

/// Enters when the return over `lookback` bars exceeds `threshold`, exits when it falls below
/// `-threshold`.
#[derive(Debug, Clone)]
pub struct Momentum {
    lookback: usize,
    threshold: f64,
}

impl Momentum {
    pub fn new(lookback: usize, threshold: f64) -> Result<Self, String> {
        if lookback == 0 {
            return Err("momentum lookback must be positive".to_string());
        }
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(format!("momentum threshold must be >= 0, got {threshold}"));
        }
        Ok(Self {
            lookback,
            threshold,
        })
    }
}

impl SignalSource for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String> {
        let mut signals = Vec::new();
        for bar in fresh_bars(engine) {
            let history = engine.history(&bar.instrument);
            if history.len() <= self.lookback {
                continue;
            }
            let closes: Vec<f64> = history[history.len() - self.lookback - 1..]
                .iter()
                .map(|b| b.close)
                .collect();
            let Some(ret) = lookback_return(&closes) else {
                continue;
            };

            let holding = engine.position(&bar.instrument).is_some();
            let side = if ret > self.threshold && !holding {
                SignalSide::Buy
            } else if ret < -self.threshold && holding {
                SignalSide::Sell
            } else {
                continue;
            };
            signals.push(Signal::new(
                bar.timestamp,
                bar.instrument.clone(),
                side,
                (ret.abs() * 10.0).min(1.0),
                format!("return over {} bars: {:.4}", self.lookback, ret),
                self.name(),
            ));
        }
        Ok(signals)
    }
}

/// Closed set of built-in sources, so callers can hold any of them by value.
#[derive(Debug)]
pub enum StrategyKind {
    BuyAndHold(BuyAndHold),
    SmaCrossover(SmaCrossover),
    Momentum(Momentum),
    Ensemble(AgentEnsemble),
}

impl SignalSource for StrategyKind {
    fn name(&self) -> &str {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.name(),
            StrategyKind::SmaCrossover(strategy) => strategy.name(),
            StrategyKind::Momentum(strategy) => strategy.name(),
            StrategyKind::Ensemble(strategy) => strategy.name(),
        }
    }

    fn initialize(&mut self, engine: &SimulationEngine) -> Result<(), String> {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.initialize(engine),
            StrategyKind::SmaCrossover(strategy) => strategy.initialize(engine),
            StrategyKind::Momentum(strategy) => strategy.initialize(engine),
            StrategyKind::Ensemble(strategy) => strategy.initialize(engine),
        }
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String> {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.generate_signals(engine),
            StrategyKind::SmaCrossover(strategy) => strategy.generate_signals(engine),
            StrategyKind::Momentum(strategy) => strategy.generate_signals(engine),
            StrategyKind::Ensemble(strategy) => strategy.generate_signals(engine),
        }
    }

    fn finalize(&mut self, engine: &SimulationEngine) -> Result<(), String> {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.finalize(engine),
            StrategyKind::SmaCrossover(strategy) => strategy.finalize(engine),
            StrategyKind::Momentum(strategy) => strategy.finalize(engine),
            StrategyKind::Ensemble(strategy) => strategy.finalize(engine),
        }
    }
}
