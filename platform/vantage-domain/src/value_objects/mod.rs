pub mod bar;
pub mod date_range;
pub mod equity_point;
pub mod position;
pub mod side;
pub mod signal;
pub mod trade;
