use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSide {
    Buy,
    Sell,
    Hold,
}

impl SignalSide {
    pub const ALL: [SignalSide; 3] = [SignalSide::Buy, SignalSide::Sell, SignalSide::Hold];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Buy => "BUY",
            SignalSide::Sell => "SELL",
            SignalSide::Hold => "HOLD",
        }
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalSide {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "BUY" => Ok(SignalSide::Buy),
            "SELL" => Ok(SignalSide::Sell),
            "HOLD" => Ok(SignalSide::Hold),
            _ => Err(EngineError::UnknownSignalSide(value.to_string())),
        }
    }
}

/// Direction of an executed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Direction of an open holding. The engine only opens long positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
}

#[cfg(test)]
mod tests {
    use super::SignalSide;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" buy ".parse::<SignalSide>().unwrap(), SignalSide::Buy);
        assert_eq!("Sell".parse::<SignalSide>().unwrap(), SignalSide::Sell);
        assert_eq!("HOLD".parse::<SignalSide>().unwrap(), SignalSide::Hold);
    }

    #[test]
    fn rejects_unknown_side() {
        let err = "SHORT".parse::<SignalSide>().unwrap_err();
        assert!(err.to_string().contains("SHORT"));
    }
}
