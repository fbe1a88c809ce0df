use crate::entities::trade_stats::TradeStats;
use crate::error::EngineError;
use crate::services::engine::SimulationEngine;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::position::ClosedPosition;
use serde::{Deserialize, Serialize};

const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Annual risk-free rate as a fraction (0.03 = 3%).
    pub risk_free_rate: f64,
    /// Steps per year used to annualize per-step returns.
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.03,
            periods_per_year: 252.0,
        }
    }
}

/// Read-only performance snapshot of one completed run. Percent fields are in percent units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub start: i64,
    pub end: i64,
    pub bars_processed: usize,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub annualized_return_pct: f64,
    pub volatility_pct: f64,
    pub downside_deviation_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub total_commission: f64,
    pub avg_holding_seconds: f64,
    pub min_holding_seconds: i64,
    pub max_holding_seconds: i64,
}

/// Everything the calculator needs, borrowed from a finished run.
#[derive(Debug, Clone, Copy)]
pub struct MetricsInput<'a> {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub equity_curve: &'a [EquityPoint],
    pub closed_positions: &'a [ClosedPosition],
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub total_commission: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCalculator {
    config: MetricsConfig,
}

impl MetricsCalculator {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> MetricsConfig {
        self.config
    }

    pub fn calculate(&self, engine: &SimulationEngine) -> Result<Metrics, EngineError> {
        self.calculate_from(MetricsInput {
            initial_capital: engine.initial_capital(),
            final_equity: engine.total_equity(),
            equity_curve: engine.equity_curve(),
            closed_positions: engine.closed_positions(),
            max_drawdown: engine.max_drawdown(),
            max_drawdown_pct: engine.max_drawdown_pct(),
            total_commission: engine.total_commission(),
        })
    }

    pub fn calculate_from(&self, input: MetricsInput<'_>) -> Result<Metrics, EngineError> {
        let (Some(first), Some(last)) = (input.equity_curve.first(), input.equity_curve.last())
        else {
            return Err(EngineError::EmptyEquityCurve);
        };

        let initial = input.initial_capital;
        let final_equity = input.final_equity;
        let total_return = final_equity - initial;
        let total_return_pct = if initial > 0.0 {
            total_return / initial * 100.0
        } else {
            0.0
        };

        let elapsed = last.timestamp.saturating_sub(first.timestamp);
        let cagr_pct = if elapsed > 0 && initial > 0.0 && final_equity > 0.0 {
            let years = elapsed as f64 / SECONDS_PER_YEAR;
            ((final_equity / initial).powf(1.0 / years) - 1.0) * 100.0
        } else {
            0.0
        };

        let returns = step_returns(input.equity_curve);
        let periods = self.config.periods_per_year;
        let annualized_return_pct = mean(&returns) * periods * 100.0;
        let volatility_pct = sample_std(&returns) * periods.sqrt() * 100.0;
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_deviation_pct = sample_std(&downside) * periods.sqrt() * 100.0;

        let excess_pct = annualized_return_pct - self.config.risk_free_rate * 100.0;
        let sharpe = safe_ratio(excess_pct, volatility_pct);
        let sortino = safe_ratio(excess_pct, downside_deviation_pct);
        let max_drawdown_pct = input.max_drawdown_pct.clamp(0.0, 100.0);
        let calmar = safe_ratio(cagr_pct, max_drawdown_pct);

        let stats = TradeStats::from_closed(input.closed_positions);
        let win_prob = stats.win_rate();
        let loss_prob = if stats.closed_trades > 0 {
            stats.losses as f64 / stats.closed_trades as f64
        } else {
            0.0
        };
        let profit_factor = if stats.gross_loss < 0.0 {
            stats.gross_profit / stats.gross_loss.abs()
        } else {
            0.0
        };

        let pnls = input.closed_positions.iter().map(|p| p.realized_pnl);
        let largest_win = pnls.clone().filter(|p| *p > 0.0).fold(0.0, f64::max);
        let largest_loss = pnls.filter(|p| *p < 0.0).fold(0.0, f64::min);

        let holding: Vec<i64> = input
            .closed_positions
            .iter()
            .map(|p| p.holding_seconds)
            .collect();
        let avg_holding_seconds = if holding.is_empty() {
            0.0
        } else {
            holding.iter().sum::<i64>() as f64 / holding.len() as f64
        };

        Ok(Metrics {
            start: first.timestamp,
            end: last.timestamp,
            bars_processed: input.equity_curve.len(),
            initial_capital: initial,
            final_equity,
            total_return,
            total_return_pct,
            cagr_pct,
            annualized_return_pct,
            volatility_pct,
            downside_deviation_pct,
            sharpe,
            sortino,
            calmar,
            max_drawdown: input.max_drawdown.max(0.0),
            max_drawdown_pct,
            total_trades: stats.closed_trades,
            winning_trades: stats.wins,
            losing_trades: stats.losses,
            win_rate_pct: win_prob * 100.0,
            avg_win: stats.avg_win(),
            avg_loss: stats.avg_loss(),
            largest_win,
            largest_loss,
            profit_factor,
            expectancy: win_prob * stats.avg_win() + loss_prob * stats.avg_loss(),
            total_commission: input.total_commission,
            avg_holding_seconds,
            min_holding_seconds: holding.iter().copied().min().unwrap_or(0),
            max_holding_seconds: holding.iter().copied().max().unwrap_or(0),
        })
    }
}

fn step_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .filter(|pair| pair[0].equity > 0.0)
        .map(|pair| pair[1].equity / pair[0].equity - 1.0)
        .filter(|r| r.is_finite())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() as f64 - 1.0);
    var.sqrt()
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && denominator.is_finite() && numerator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::side::PositionSide;

    fn point(ts: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: ts,
            equity,
            cash: equity,
            holdings_value: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            open_positions: 0,
        }
    }

    fn closed(pnl: f64, holding: i64) -> ClosedPosition {
        ClosedPosition {
            instrument: "BTCUSD".to_string(),
            side: PositionSide::Long,
            entry_time: 0,
            exit_time: holding,
            entry_price: 100.0,
            exit_price: 100.0,
            quantity: 1.0,
            realized_pnl: pnl,
            return_pct: pnl,
            holding_seconds: holding,
            total_commission: 0.0,
        }
    }

    fn input<'a>(curve: &'a [EquityPoint], closed: &'a [ClosedPosition]) -> MetricsInput<'a> {
        MetricsInput {
            initial_capital: 100.0,
            final_equity: curve.last().map(|p| p.equity).unwrap_or(100.0),
            equity_curve: curve,
            closed_positions: closed,
            max_drawdown: 10.0,
            max_drawdown_pct: 10.0,
            total_commission: 0.0,
        }
    }

    #[test]
    fn empty_curve_is_a_hard_error() {
        let err = MetricsCalculator::default()
            .calculate_from(input(&[], &[]))
            .unwrap_err();
        assert_eq!(err, EngineError::EmptyEquityCurve);
    }

    #[test]
    fn computes_returns_and_trade_stats() {
        let curve = vec![point(0, 100.0), point(86_400, 90.0), point(172_800, 120.0)];
        let closed = vec![closed(30.0, 60), closed(-10.0, 120), closed(10.0, 30)];
        let m = MetricsCalculator::default()
            .calculate_from(input(&curve, &closed))
            .unwrap();

        assert!((m.total_return - 20.0).abs() < 1e-9);
        assert!((m.total_return_pct - 20.0).abs() < 1e-9);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 1);
        assert!((m.profit_factor - 4.0).abs() < 1e-9);
        assert!((m.avg_win - 20.0).abs() < 1e-9);
        assert!((m.avg_loss + 10.0).abs() < 1e-9);
        assert_eq!(m.largest_win, 30.0);
        assert_eq!(m.largest_loss, -10.0);
        // (2/3) * 20 + (1/3) * -10
        assert!((m.expectancy - 10.0).abs() < 1e-9);
        assert_eq!(m.min_holding_seconds, 30);
        assert_eq!(m.max_holding_seconds, 120);
        assert!((m.avg_holding_seconds - 70.0).abs() < 1e-9);
        assert!(m.cagr_pct > 0.0);
        assert!((m.calmar - m.cagr_pct / 10.0).abs() < 1e-9);
    }

    #[test]
    fn sortino_is_zero_without_negative_returns() {
        let curve = vec![point(0, 100.0), point(1, 101.0), point(2, 103.0)];
        let m = MetricsCalculator::default()
            .calculate_from(input(&curve, &[]))
            .unwrap();
        assert_eq!(m.downside_deviation_pct, 0.0);
        assert_eq!(m.sortino, 0.0);
        assert!(m.sharpe.is_finite());
    }

    #[test]
    fn profit_factor_is_zero_without_losses() {
        let curve = vec![point(0, 100.0), point(1, 110.0)];
        let closed = vec![closed(10.0, 1)];
        let m = MetricsCalculator::default()
            .calculate_from(input(&curve, &closed))
            .unwrap();
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.win_rate_pct, 100.0);
    }

    #[test]
    fn flat_curve_has_zero_risk_ratios() {
        let curve = vec![point(0, 100.0), point(1, 100.0), point(2, 100.0)];
        let m = MetricsCalculator::default()
            .calculate_from(input(&curve, &[]))
            .unwrap();
        assert_eq!(m.volatility_pct, 0.0);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.cagr_pct, 0.0);
    }
}
