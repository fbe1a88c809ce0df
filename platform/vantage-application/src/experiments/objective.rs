use serde::{Deserialize, Serialize};
use std::str::FromStr;
use vantage_domain::entities::metrics::Metrics;

/// Scalar fitness of a finished run; higher is better.
pub trait Objective: Sync {
    fn name(&self) -> &str;

    fn score(&self, metrics: &Metrics) -> f64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    #[default]
    Sharpe,
    Sortino,
    Calmar,
    TotalReturn,
    ProfitFactor,
    WinRate,
    Expectancy,
}

impl ObjectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveKind::Sharpe => "sharpe",
            ObjectiveKind::Sortino => "sortino",
            ObjectiveKind::Calmar => "calmar",
            ObjectiveKind::TotalReturn => "total_return",
            ObjectiveKind::ProfitFactor => "profit_factor",
            ObjectiveKind::WinRate => "win_rate",
            ObjectiveKind::Expectancy => "expectancy",
        }
    }
}

impl FromStr for ObjectiveKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sharpe" => Ok(ObjectiveKind::Sharpe),
            "sortino" => Ok(ObjectiveKind::Sortino),
            "calmar" => Ok(ObjectiveKind::Calmar),
            "total_return" | "return" => Ok(ObjectiveKind::TotalReturn),
            "profit_factor" => Ok(ObjectiveKind::ProfitFactor),
            "win_rate" => Ok(ObjectiveKind::WinRate),
            "expectancy" => Ok(ObjectiveKind::Expectancy),
            other => Err(format!("unknown objective: {other}")),
        }
    }
}

impl Objective for ObjectiveKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn score(&self, metrics: &Metrics) -> f64 {
        match self {
            ObjectiveKind::Sharpe => metrics.sharpe,
            ObjectiveKind::Sortino => metrics.sortino,
            ObjectiveKind::Calmar => metrics.calmar,
            ObjectiveKind::TotalReturn => metrics.total_return_pct,
            ObjectiveKind::ProfitFactor => metrics.profit_factor,
            ObjectiveKind::WinRate => metrics.win_rate_pct,
            ObjectiveKind::Expectancy => metrics.expectancy,
        }
    }
}

/// Wraps any `Fn(&Metrics) -> f64` as a named objective.
pub struct FnObjective<F> {
    name: String,
    f: F,
}

impl<F> FnObjective<F>
where
    F: Fn(&Metrics) -> f64 + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Objective for FnObjective<F>
where
    F: Fn(&Metrics) -> f64 + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, metrics: &Metrics) -> f64 {
        (self.f)(metrics)
    }
}

/// NaN scores sort below every real score.
pub(crate) fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}
