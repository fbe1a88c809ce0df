//! Independent analysts consulted by the ensemble source. Each agent sees one instrument at a
//! time and votes; the consensus resolver turns the votes into at most one order.

use crate::services::features::{lookback_return, RollingRsi, RollingSma};
use crate::value_objects::bar::Bar;
use crate::value_objects::side::SignalSide;
use crate::value_objects::signal::Signal;
use std::collections::BTreeMap;

/// Account view handed to agents alongside the market data.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext {
    pub timestamp: i64,
    pub cash: f64,
    pub equity: f64,
    pub has_position: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot<'a> {
    pub bar: &'a Bar,
    /// Consumed bars for the instrument, oldest first, ending with `bar`.
    pub history: &'a [Bar],
}

pub trait Agent {
    fn name(&self) -> &str;

    /// Returns `None` while the agent has no opinion (e.g. warming up).
    fn analyze(
        &mut self,
        context: &AgentContext,
        snapshot: &MarketSnapshot<'_>,
    ) -> Result<Option<Signal>, String>;

    fn reset(&mut self) -> Result<(), String>;
}

/// Votes BUY while the short average is above the long one, SELL while below.
#[derive(Debug, Clone)]
pub struct SmaTrendAgent {
    short_window: usize,
    long_window: usize,
    state: BTreeMap<String, (RollingSma, RollingSma)>,
}

impl SmaTrendAgent {
    pub fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short_window,
            long_window,
            state: BTreeMap::new(),
        }
    }
}

impl Agent for SmaTrendAgent {
    fn name(&self) -> &str {
        "sma_trend"
    }

    fn analyze(
        &mut self,
        _context: &AgentContext,
        snapshot: &MarketSnapshot<'_>,
    ) -> Result<Option<Signal>, String> {
        let bar = snapshot.bar;
        let (short_sma, long_sma) = self
            .state
            .entry(bar.instrument.clone())
            .or_insert_with(|| {
                (
                    RollingSma::new(self.short_window),
                    RollingSma::new(self.long_window),
                )
            });
        let short = short_sma.update(bar.close);
        let long = long_sma.update(bar.close);
        let (Some(short), Some(long)) = (short, long) else {
            return Ok(None);
        };
        if long <= 0.0 {
            return Ok(None);
        }

        let spread = (short - long) / long;
        let side = if spread > 0.0 {
            SignalSide::Buy
        } else if spread < 0.0 {
            SignalSide::Sell
        } else {
            SignalSide::Hold
        };
        Ok(Some(Signal::new(
            bar.timestamp,
            bar.instrument.clone(),
            side,
            (spread.abs() * 50.0).min(1.0),
            format!("sma spread {spread:.4}"),
            "sma_trend",
        )))
    }

    fn reset(&mut self) -> Result<(), String> {
        self.state.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MomentumAgent {
    lookback: usize,
    threshold: f64,
}

impl MomentumAgent {
    pub fn new(lookback: usize, threshold: f64) -> Self {
        Self {
            lookback,
            threshold,
        }
    }
}

impl Agent for MomentumAgent {
    fn name(&self) -> &str {
        "momentum"
    }

    fn analyze(
        &mut self,
        _context: &AgentContext,
        snapshot: &MarketSnapshot<'_>,
    ) -> Result<Option<Signal>, String> {
        let history = snapshot.history;
        if self.lookback == 0 || history.len() <= self.lookback {
            return Ok(None);
        }
        let closes: Vec<f64> = history[history.len() - self.lookback - 1..]
            .iter()
            .map(|b| b.close)
            .collect();
        let Some(ret) = lookback_return(&closes) else {
            return Ok(None);
        };

        let side = if ret > self.threshold {
            SignalSide::Buy
        } else if ret < -self.threshold {
            SignalSide::Sell
        } else {
            SignalSide::Hold
        };
        let bar = snapshot.bar;
        Ok(Some(Signal::new(
            bar.timestamp,
            bar.instrument.clone(),
            side,
            (ret.abs() * 10.0).min(1.0),
            format!("{}-bar return {ret:.4}", self.lookback),
            "momentum",
        )))
    }

    fn reset(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Mean-reversion vote: BUY when oversold, SELL when overbought, HOLD in between.
#[derive(Debug, Clone)]
pub struct RsiAgent {
    window: usize,
    oversold: f64,
    overbought: f64,
    state: BTreeMap<String, RollingRsi>,
}

impl RsiAgent {
    pub fn new(window: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            window,
            oversold,
            overbought,
            state: BTreeMap::new(),
        }
    }
}

impl Agent for RsiAgent {
    fn name(&self) -> &str {
        "rsi"
    }

    fn analyze(
        &mut self,
        _context: &AgentContext,
        snapshot: &MarketSnapshot<'_>,
    ) -> Result<Option<Signal>, String> {
        let bar = snapshot.bar;
        let rsi = self
            .state
            .entry(bar.instrument.clone())
            .or_insert_with(|| RollingRsi::new(self.window));
        let Some(value) = rsi.update(bar.close) else {
            return Ok(None);
        };

        let (side, confidence) = if value <= self.oversold {
            (SignalSide::Buy, (self.oversold - value) / self.oversold.max(1.0))
        } else if value >= self.overbought {
            (
                SignalSide::Sell,
                (value - self.overbought) / (100.0 - self.overbought).max(1.0),
            )
        } else {
            (SignalSide::Hold, 0.5)
        };
        Ok(Some(Signal::new(
            bar.timestamp,
            bar.instrument.clone(),
            side,
            confidence.max(0.1),
            format!("rsi {value:.2}"),
            "rsi",
        )))
    }

    fn reset(&mut self) -> Result<(), String> {
        self.state.clear();
        Ok(())
    }
}
