//! Incremental indicators shared by the built-in strategies and agents.

mod rolling;

pub use rolling::{RollingRsi, RollingSma};

/// Simple return between the first and last close of `closes`, if both are usable.
pub fn lookback_return(closes: &[f64]) -> Option<f64> {
    let (first, last) = (closes.first()?, closes.last()?);
    if *first <= 0.0 || !first.is_finite() || !last.is_finite() || closes.len() < 2 {
        return None;
    }
    Some(last / first - 1.0)
}
