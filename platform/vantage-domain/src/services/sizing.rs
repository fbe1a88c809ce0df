//! Position sizing policies and the Kelly criterion calculator.

use crate::entities::trade_stats::TradeStats;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FIXED_NOTIONAL: f64 = 1_000.0;
/// Share of equity the kelly policy commits when no trade history is available to it.
pub const KELLY_NO_HISTORY_FRACTION: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum SizingPolicy {
    /// Constant notional per trade.
    Fixed { notional: f64 },
    /// Fraction of current total equity.
    Percent { fraction: f64 },
    /// Fractional Kelly; `multiplier` scales the raw formula (0.25 = quarter Kelly).
    Kelly { multiplier: f64 },
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy::Fixed {
            notional: DEFAULT_FIXED_NOTIONAL,
        }
    }
}

impl SizingPolicy {
    /// Builds a policy from its configured name. Unknown names fall back to a fixed $1,000
    /// notional.
    pub fn from_name(
        name: &str,
        fixed_notional: f64,
        percent_fraction: f64,
        kelly_multiplier: f64,
    ) -> Self {
        match name.trim().to_lowercase().as_str() {
            "fixed" => SizingPolicy::Fixed {
                notional: fixed_notional,
            },
            "percent" | "pct" | "pct_equity" => SizingPolicy::Percent {
                fraction: percent_fraction,
            },
            "kelly" => SizingPolicy::Kelly {
                multiplier: kelly_multiplier,
            },
            other => {
                tracing::warn!(policy = other, "unknown sizing policy, using fixed notional");
                SizingPolicy::default()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SizingPolicy::Fixed { .. } => "fixed",
            SizingPolicy::Percent { .. } => "percent",
            SizingPolicy::Kelly { .. } => "kelly",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let (label, value) = match self {
            SizingPolicy::Fixed { notional } => ("fixed notional", *notional),
            SizingPolicy::Percent { fraction } => ("percent fraction", *fraction),
            SizingPolicy::Kelly { multiplier } => ("kelly multiplier", *multiplier),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(format!("{label} must be positive, got {value}"));
        }
        Ok(())
    }
}

/// Account state the sizer sees at call time.
#[derive(Debug, Clone, Copy)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
    /// Closed-trade history, when the caller chooses to expose it.
    pub trade_stats: Option<TradeStats>,
}

/// Quantity to buy at `price`. Never negative; returns 0 for unusable inputs.
pub fn position_size(price: f64, policy: &SizingPolicy, account: &AccountSnapshot) -> f64 {
    if !price.is_finite() || price <= 0.0 {
        return 0.0;
    }
    let qty = match policy {
        SizingPolicy::Fixed { notional } => notional / price,
        SizingPolicy::Percent { fraction } => account.equity * fraction / price,
        SizingPolicy::Kelly { multiplier } => match account.trade_stats.as_ref() {
            None => account.equity * KELLY_NO_HISTORY_FRACTION / price,
            Some(stats) => {
                KellyCalculator::new(*multiplier)
                    .recommend(stats, account.equity, price)
                    .quantity
            }
        },
    };
    if qty.is_finite() && qty > 0.0 {
        qty
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KellyBasis {
    Formula,
    InsufficientHistory,
    DegenerateWinRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyRecommendation {
    /// Unscaled formula output; `None` when a guard rail replaced the formula.
    pub raw_fraction: Option<f64>,
    /// Share of equity actually committed.
    pub fraction: f64,
    pub notional: f64,
    pub quantity: f64,
    pub basis: KellyBasis,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyCalculator {
    pub multiplier: f64,
    pub min_trades: usize,
    pub floor: f64,
    pub cap: f64,
    pub fallback_fraction: f64,
}

impl KellyCalculator {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            min_trades: 30,
            floor: 0.01,
            cap: 0.25,
            fallback_fraction: 0.10,
        }
    }

    /// `kelly = (p*r - q) / r`, scaled by the multiplier and clamped to `[floor, cap]`.
    pub fn fraction(&self, stats: &TradeStats) -> (Option<f64>, f64, KellyBasis) {
        if stats.closed_trades < self.min_trades {
            return (None, self.fallback_fraction, KellyBasis::InsufficientHistory);
        }
        if stats.wins == 0 || stats.losses == 0 {
            return (None, self.fallback_fraction, KellyBasis::DegenerateWinRate);
        }
        let Some(ratio) = stats.win_loss_ratio() else {
            return (None, self.fallback_fraction, KellyBasis::DegenerateWinRate);
        };

        let p = stats.win_rate();
        let q = 1.0 - p;
        let raw = (p * ratio - q) / ratio;
        let adjusted = raw * self.multiplier;
        let applied = if adjusted.is_finite() {
            adjusted.clamp(self.floor, self.cap)
        } else {
            self.floor
        };
        (Some(raw), applied, KellyBasis::Formula)
    }

    pub fn recommend(&self, stats: &TradeStats, equity: f64, price: f64) -> KellyRecommendation {
        let (raw_fraction, fraction, basis) = self.fraction(stats);
        let notional = if equity.is_finite() && equity > 0.0 {
            equity * fraction
        } else {
            0.0
        };
        let quantity = if price.is_finite() && price > 0.0 {
            notional / price
        } else {
            0.0
        };
        KellyRecommendation {
            raw_fraction,
            fraction,
            notional,
            quantity,
            basis,
        }
    }
}
