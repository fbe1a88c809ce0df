use crate::entities::trade_stats::TradeStats;
use crate::error::EngineError;
use crate::services::engine::config::EngineConfig;
use crate::services::sizing::{position_size, AccountSnapshot};
use crate::services::strategy::SignalSource;
use crate::value_objects::bar::Bar;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::position::{ClosedPosition, Position};
use crate::value_objects::side::{PositionSide, SignalSide, TradeSide};
use crate::value_objects::signal::Signal;
use crate::value_objects::trade::Trade;
use std::collections::BTreeMap;
use tracing::debug;

const FORCED_CLOSE_AGENT: &str = "engine";

/// Why a signal did not produce a fill. None of these stop the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMarketData,
    PositionExists,
    PositionLimit,
    NonPositiveQuantity,
    InsufficientCash,
    NoPosition,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoMarketData => "no_market_data",
            SkipReason::PositionExists => "position_exists",
            SkipReason::PositionLimit => "position_limit",
            SkipReason::NonPositiveQuantity => "non_positive_quantity",
            SkipReason::InsufficientCash => "insufficient_cash",
            SkipReason::NoPosition => "no_position",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// A fill was recorded; carries the trade id.
    Filled(u64),
    Skipped(SkipReason),
    /// HOLD signals are accepted and do nothing.
    Held,
}

#[derive(Debug)]
struct SeriesCursor {
    bars: Vec<Bar>,
    /// Index of the next unread bar; `bars[..next]` has been consumed.
    next: usize,
}

impl SeriesCursor {
    fn current(&self) -> Option<&Bar> {
        self.next.checked_sub(1).and_then(|idx| self.bars.get(idx))
    }

    fn peek_timestamp(&self) -> Option<i64> {
        self.bars.get(self.next).map(|bar| bar.timestamp)
    }
}

/// Event-driven, single-threaded backtest state machine. One instance owns the cash, open
/// positions, logs and equity curve of exactly one run.
#[derive(Debug)]
pub struct SimulationEngine {
    config: EngineConfig,
    series: BTreeMap<String, SeriesCursor>,
    cash: f64,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    closed_positions: Vec<ClosedPosition>,
    equity_curve: Vec<EquityPoint>,
    current_time: Option<i64>,
    steps: usize,
    next_trade_id: u64,
    peak_equity: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
    realized_pnl: f64,
    total_commission: f64,
    stats: TradeStats,
}

impl SimulationEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            series: BTreeMap::new(),
            cash: config.initial_capital,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            closed_positions: Vec::new(),
            equity_curve: Vec::new(),
            current_time: None,
            steps: 0,
            next_trade_id: 1,
            peak_equity: config.initial_capital,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            realized_pnl: 0.0,
            total_commission: 0.0,
            stats: TradeStats::default(),
        })
    }

    /// Loads (or replaces) the bar series for `instrument`, sorted ascending by timestamp, with
    /// its read cursor at the start.
    pub fn load_series(&mut self, instrument: &str, mut bars: Vec<Bar>) -> Result<(), EngineError> {
        if bars.is_empty() {
            return Err(EngineError::EmptySeries(instrument.to_string()));
        }
        bars.sort_by_key(|bar| bar.timestamp);
        self.series
            .insert(instrument.to_string(), SeriesCursor { bars, next: 0 });
        Ok(())
    }

    /// Advances simulated time to the earliest unread bar across all instruments. Returns false
    /// once every series is exhausted.
    pub fn step(&mut self) -> bool {
        let Some(now) = self
            .series
            .values()
            .filter_map(SeriesCursor::peek_timestamp)
            .min()
        else {
            return false;
        };
        self.current_time = Some(now);
        self.steps += 1;

        for cursor in self.series.values_mut() {
            while cursor.peek_timestamp().is_some_and(|ts| ts <= now) {
                cursor.next += 1;
            }
        }

        for (instrument, position) in self.positions.iter_mut() {
            if let Some(bar) = self.series.get(instrument).and_then(SeriesCursor::current) {
                position.mark(bar.close);
            }
        }

        self.record_equity(now);
        true
    }

    /// Applies one signal against the current close of its instrument.
    pub fn execute_signal(&mut self, signal: &Signal) -> Execution {
        match signal.side {
            SignalSide::Hold => Execution::Held,
            SignalSide::Buy => self.buy(signal),
            SignalSide::Sell => self.sell(signal),
        }
    }

    pub fn run(&mut self, source: &mut dyn SignalSource) -> Result<(), EngineError> {
        self.run_with_cancel(source, None)
    }

    /// Drives `source` over every step. `should_cancel` is polled between steps only.
    pub fn run_with_cancel(
        &mut self,
        source: &mut dyn SignalSource,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<(), EngineError> {
        if self.series.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no price series loaded".to_string(),
            ));
        }
        let source_name = source.name().to_string();
        let source_error = |stage: &'static str, message: String| EngineError::SignalSource {
            source_name: source_name.clone(),
            stage,
            message,
        };

        source
            .initialize(self)
            .map_err(|err| source_error("initialize", err))?;

        loop {
            if should_cancel.is_some_and(|f| f()) {
                return Err(EngineError::Cancelled);
            }
            if !self.step() {
                break;
            }
            let signals = source
                .generate_signals(self)
                .map_err(|err| source_error("generate", err))?;
            for signal in &signals {
                self.execute_signal(signal);
            }
        }

        self.close_all_positions();
        source
            .finalize(self)
            .map_err(|err| source_error("finalize", err))?;

        debug!(
            source = %source_name,
            steps = self.steps,
            trades = self.trades.len(),
            final_equity = self.total_equity(),
            "simulation complete"
        );
        Ok(())
    }

    /// Sells every open position at its instrument's latest close.
    pub fn close_all_positions(&mut self) {
        let open: Vec<String> = self.positions.keys().cloned().collect();
        let timestamp = self.current_time.unwrap_or_default();
        for instrument in open {
            let signal = Signal::new(
                timestamp,
                instrument,
                SignalSide::Sell,
                1.0,
                "forced close at end of data",
                FORCED_CLOSE_AGENT,
            );
            self.sell(&signal);
        }
    }

    fn buy(&mut self, signal: &Signal) -> Execution {
        let instrument = signal.instrument.as_str();
        if self.positions.contains_key(instrument) {
            return self.skip(signal, SkipReason::PositionExists);
        }
        if self.positions.len() >= self.config.max_positions {
            return self.skip(signal, SkipReason::PositionLimit);
        }
        let Some(close) = self.current_close(instrument) else {
            return self.skip(signal, SkipReason::NoMarketData);
        };

        let price = close * (1.0 + self.config.slippage_bps / 10_000.0);
        let account = AccountSnapshot {
            equity: self.total_equity(),
            cash: self.cash,
            trade_stats: self.config.kelly_use_history.then_some(self.stats),
        };
        let quantity = position_size(price, &self.config.sizing, &account);
        if quantity <= 0.0 {
            return self.skip(signal, SkipReason::NonPositiveQuantity);
        }

        let value = quantity * price;
        let commission = value * self.config.commission_rate;
        if value + commission > self.cash {
            return self.skip(signal, SkipReason::InsufficientCash);
        }

        self.cash -= value + commission;
        if self.cash < 0.0 && self.cash > -1e-9 {
            self.cash = 0.0;
        }
        self.total_commission += commission;

        let timestamp = self.current_time.unwrap_or(signal.timestamp);
        let mut position = Position {
            instrument: instrument.to_string(),
            side: PositionSide::Long,
            entry_time: timestamp,
            entry_price: price,
            quantity,
            entry_commission: commission,
            mark_price: close,
            unrealized_pnl: 0.0,
        };
        position.mark(close);
        self.positions.insert(instrument.to_string(), position);

        let id = self.push_trade(
            signal,
            TradeSide::Buy,
            quantity,
            price,
            commission,
            (price - close) * quantity,
        );
        debug!(instrument, quantity, price, commission, "buy filled");
        Execution::Filled(id)
    }

    fn sell(&mut self, signal: &Signal) -> Execution {
        let instrument = signal.instrument.as_str();
        if !self.positions.contains_key(instrument) {
            return self.skip(signal, SkipReason::NoPosition);
        }
        let Some(close) = self.current_close(instrument) else {
            return self.skip(signal, SkipReason::NoMarketData);
        };
        let Some(position) = self.positions.remove(instrument) else {
            return self.skip(signal, SkipReason::NoPosition);
        };

        let price = close * (1.0 - self.config.slippage_bps / 10_000.0);
        let proceeds = position.quantity * price;
        let commission = proceeds * self.config.commission_rate;
        let realized_pnl =
            (proceeds - commission) - position.entry_cost() - position.entry_commission;

        self.cash += proceeds - commission;
        self.total_commission += commission;
        self.realized_pnl += realized_pnl;
        self.stats.record(realized_pnl);

        let timestamp = self.current_time.unwrap_or(signal.timestamp);
        let basis = position.entry_cost() + position.entry_commission;
        self.closed_positions.push(ClosedPosition {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_time: position.entry_time,
            exit_time: timestamp,
            entry_price: position.entry_price,
            exit_price: price,
            quantity: position.quantity,
            realized_pnl,
            return_pct: if basis > 0.0 {
                realized_pnl / basis * 100.0
            } else {
                0.0
            },
            holding_seconds: timestamp.saturating_sub(position.entry_time),
            total_commission: position.entry_commission + commission,
        });

        let id = self.push_trade(
            signal,
            TradeSide::Sell,
            position.quantity,
            price,
            commission,
            (close - price) * position.quantity,
        );
        debug!(instrument, realized_pnl, price, commission, "sell filled");
        Execution::Filled(id)
    }

    fn push_trade(
        &mut self,
        signal: &Signal,
        side: TradeSide,
        quantity: f64,
        price: f64,
        commission: f64,
        slippage: f64,
    ) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        self.trades.push(Trade {
            id,
            timestamp: self.current_time.unwrap_or(signal.timestamp),
            instrument: signal.instrument.clone(),
            side,
            quantity,
            price,
            commission,
            slippage,
            signal: signal.clone(),
        });
        id
    }

    fn skip(&self, signal: &Signal, reason: SkipReason) -> Execution {
        debug!(
            instrument = %signal.instrument,
            side = %signal.side,
            agent = %signal.agent,
            reason = reason.as_str(),
            "signal skipped"
        );
        Execution::Skipped(reason)
    }

    fn record_equity(&mut self, timestamp: i64) {
        let holdings_value: f64 = self.positions.values().map(Position::market_value).sum();
        let unrealized_pnl: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        let equity = self.cash + holdings_value;

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = (self.peak_equity - equity).max(0.0);
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        if self.peak_equity > 0.0 {
            let pct = (drawdown / self.peak_equity * 100.0).clamp(0.0, 100.0);
            if pct > self.max_drawdown_pct {
                self.max_drawdown_pct = pct;
            }
        }

        self.equity_curve.push(EquityPoint {
            timestamp,
            equity,
            cash: self.cash,
            holdings_value,
            unrealized_pnl,
            realized_pnl: self.realized_pnl,
            open_positions: self.positions.len(),
        });
    }

    fn current_close(&self, instrument: &str) -> Option<f64> {
        self.current_bar(instrument)
            .map(|bar| bar.close)
            .filter(|close| close.is_finite() && *close > 0.0)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn current_time(&self) -> Option<i64> {
        self.current_time
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Latest consumed bar for `instrument`, which may predate the current time when series are
    /// misaligned.
    pub fn current_bar(&self, instrument: &str) -> Option<&Bar> {
        self.series.get(instrument).and_then(SeriesCursor::current)
    }

    /// All bars consumed so far for `instrument`, oldest first.
    pub fn history(&self, instrument: &str) -> &[Bar] {
        self.series
            .get(instrument)
            .map(|cursor| &cursor.bars[..cursor.next])
            .unwrap_or(&[])
    }

    pub fn initial_capital(&self) -> f64 {
        self.config.initial_capital
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn total_equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(Position::market_value)
                .sum::<f64>()
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed_positions
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn winning_trades(&self) -> usize {
        self.stats.wins
    }

    pub fn losing_trades(&self) -> usize {
        self.stats.losses
    }

    pub fn gross_profit(&self) -> f64 {
        self.stats.gross_profit
    }

    pub fn gross_loss(&self) -> f64 {
        self.stats.gross_loss
    }

    pub fn trade_stats(&self) -> TradeStats {
        self.stats
    }

    pub fn into_parts(self) -> (Vec<Trade>, Vec<ClosedPosition>, Vec<EquityPoint>) {
        (self.trades, self.closed_positions, self.equity_curve)
    }
}
