use crate::value_objects::side::SignalSide;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: i64,
    pub instrument: String,
    pub side: SignalSide,
    /// Clamped to `[0, 1]` on construction.
    pub confidence: f64,
    pub rationale: String,
    pub agent: String,
}

impl Signal {
    pub fn new(
        timestamp: i64,
        instrument: impl Into<String>,
        side: SignalSide,
        confidence: f64,
        rationale: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            timestamp,
            instrument: instrument.into(),
            side,
            confidence,
            rationale: rationale.into(),
            agent: agent.into(),
        }
    }

    pub fn buy(timestamp: i64, instrument: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(timestamp, instrument, SignalSide::Buy, 1.0, "", agent)
    }

    pub fn sell(timestamp: i64, instrument: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(timestamp, instrument, SignalSide::Sell, 1.0, "", agent)
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::Signal;
    use crate::value_objects::side::SignalSide;

    #[test]
    fn confidence_is_clamped() {
        let s = Signal::new(1, "BTCUSD", SignalSide::Buy, 1.7, "", "a");
        assert_eq!(s.confidence, 1.0);
        let s = Signal::new(1, "BTCUSD", SignalSide::Buy, f64::NAN, "", "a");
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn side_serializes_uppercase() {
        let s = Signal::sell(1, "BTCUSD", "a");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["side"], "SELL");
        let back: Signal = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
