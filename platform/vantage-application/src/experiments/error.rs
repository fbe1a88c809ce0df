use crate::experiments::pool::PoolError;
use thiserror::Error;
use vantage_domain::error::EngineError;

/// Setup failures of a parameter search. Individual candidate failures never surface here; they
/// are dropped from the ranking (or scored as worst-possible by the genetic search).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("invalid parameter definition: {0}")]
    InvalidParameter(String),

    #[error("no price data supplied")]
    EmptyData,

    #[error("invalid engine setup: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid walk-forward window: {0}")]
    InvalidWindow(String),

    #[error(
        "data span of {span}s cannot fit one window (in-sample {in_sample}s + out-of-sample {out_of_sample}s)"
    )]
    NoWindows {
        span: i64,
        in_sample: i64,
        out_of_sample: i64,
    },

    #[error("invalid genetic settings: {0}")]
    InvalidGenetic(String),

    #[error("search cancelled")]
    Cancelled,

    #[error("internal optimizer error: {0}")]
    Internal(String),
}

impl From<PoolError> for OptimizeError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => OptimizeError::Cancelled,
            PoolError::Incomplete { expected, received } => OptimizeError::Internal(format!(
                "expected {expected} candidate results, received {received}"
            )),
        }
    }
}
