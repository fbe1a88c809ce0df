use crate::value_objects::side::TradeSide;
use crate::value_objects::signal::Signal;
use serde::{Deserialize, Serialize};

/// A single fill. One entry per executed order, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub timestamp: i64,
    pub instrument: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub slippage: f64,
    pub signal: Signal,
}
