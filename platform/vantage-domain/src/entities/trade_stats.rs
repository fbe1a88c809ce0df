use crate::value_objects::position::ClosedPosition;
use serde::{Deserialize, Serialize};

/// Win/loss aggregates over closed positions. `gross_loss` is kept non-positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

impl TradeStats {
    pub fn from_closed(closed: &[ClosedPosition]) -> Self {
        let mut stats = Self::default();
        for pos in closed {
            stats.record(pos.realized_pnl);
        }
        stats
    }

    /// A realized P&L of exactly zero counts as a loss.
    pub fn record(&mut self, realized_pnl: f64) {
        self.closed_trades += 1;
        if realized_pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += realized_pnl;
        } else {
            self.losses += 1;
            self.gross_loss += realized_pnl.min(0.0);
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.closed_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.closed_trades as f64
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.wins == 0 {
            0.0
        } else {
            self.gross_profit / self.wins as f64
        }
    }

    /// Average losing trade, as a non-positive number.
    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 {
            0.0
        } else {
            self.gross_loss / self.losses as f64
        }
    }

    /// Average win divided by the magnitude of the average loss.
    pub fn win_loss_ratio(&self) -> Option<f64> {
        let avg_loss = self.avg_loss().abs();
        if avg_loss > 0.0 && self.wins > 0 {
            Some(self.avg_win() / avg_loss)
        } else {
            None
        }
    }
}
