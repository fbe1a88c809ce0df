use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    /// `cash + holdings_value`
    pub equity: f64,
    pub cash: f64,
    pub holdings_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub open_positions: usize,
}
