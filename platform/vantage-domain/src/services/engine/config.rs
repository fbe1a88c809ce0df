use crate::error::EngineError;
use crate::services::sizing::SizingPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Commission charged on each fill, as a fraction of notional (0.001 = 0.1%).
    pub commission_rate: f64,
    /// Adverse price adjustment applied to fills, in basis points.
    pub slippage_bps: f64,
    pub max_positions: usize,
    pub sizing: SizingPolicy,
    /// Hand closed-trade statistics to the sizer. When false, the kelly policy commits its flat
    /// no-history fraction.
    pub kelly_use_history: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_rate: 0.001,
            slippage_bps: 0.0,
            max_positions: 10,
            sizing: SizingPolicy::default(),
            kelly_use_history: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::InvalidCapital(self.initial_capital));
        }
        if !self.commission_rate.is_finite() || !(0.0..1.0).contains(&self.commission_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "commission rate must be in [0, 1), got {}",
                self.commission_rate
            )));
        }
        if !self.slippage_bps.is_finite() || self.slippage_bps < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "slippage_bps must be non-negative, got {}",
                self.slippage_bps
            )));
        }
        if self.max_positions == 0 {
            return Err(EngineError::InvalidConfig(
                "max_positions must be >= 1".to_string(),
            ));
        }
        self.sizing.validate().map_err(EngineError::InvalidConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use crate::error::EngineError;
    use crate::services::sizing::SizingPolicy;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_capital() {
        let cfg = EngineConfig {
            initial_capital: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(EngineError::InvalidCapital(0.0)));
    }

    #[test]
    fn rejects_bad_sizing_and_limits() {
        let cfg = EngineConfig {
            max_positions: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = EngineConfig {
            sizing: SizingPolicy::Percent { fraction: -0.1 },
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
