use crate::value_objects::side::PositionSide;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: PositionSide,
    pub entry_time: i64,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_commission: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn mark(&mut self, price: f64) {
        self.mark_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.quantity;
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.mark_price
    }

    pub fn entry_cost(&self) -> f64 {
        self.quantity * self.entry_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub instrument: String,
    pub side: PositionSide,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub realized_pnl: f64,
    /// Realized P&L relative to entry cost including the entry commission, in percent.
    pub return_pct: f64,
    pub holding_seconds: i64,
    pub total_commission: f64,
}
