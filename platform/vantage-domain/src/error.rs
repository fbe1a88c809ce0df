//! Domain error types.

use thiserror::Error;

/// Hard failures of a single simulation run. Per-step skip conditions (insufficient cash,
/// position limit, duplicate BUY, SELL without position) are never reported through this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("empty price series for instrument '{0}'")]
    EmptySeries(String),

    #[error("initial capital must be positive and finite, got {0}")]
    InvalidCapital(f64),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("malformed date range: start {start} is not before end {end}")]
    InvalidDateRange { start: i64, end: i64 },

    #[error("cannot compute metrics from an empty equity curve")]
    EmptyEquityCurve,

    #[error("unknown signal side: {0}")]
    UnknownSignalSide(String),

    #[error("signal source '{source_name}' failed during {stage}: {message}")]
    SignalSource {
        source_name: String,
        stage: &'static str,
        message: String,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns true for errors raised before the first step (bad inputs or configuration).
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            EngineError::EmptySeries(_)
                | EngineError::InvalidCapital(_)
                | EngineError::InvalidConfig(_)
                | EngineError::InvalidDateRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn setup_errors_are_classified() {
        assert!(EngineError::EmptySeries("X".to_string()).is_setup_error());
        assert!(EngineError::InvalidCapital(0.0).is_setup_error());
        assert!(EngineError::InvalidDateRange { start: 2, end: 1 }.is_setup_error());
        assert!(!EngineError::EmptyEquityCurve.is_setup_error());
        assert!(!EngineError::Cancelled.is_setup_error());
    }

    #[test]
    fn messages_carry_context() {
        let err = EngineError::SignalSource {
            source_name: "sma".to_string(),
            stage: "generate",
            message: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sma"));
        assert!(msg.contains("generate"));
        assert!(msg.contains("boom"));
    }
}
