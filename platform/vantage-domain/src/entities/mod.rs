pub mod metrics;
pub mod trade_stats;
