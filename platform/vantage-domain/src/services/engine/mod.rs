mod config;
mod simulation;

pub use config::EngineConfig;
pub use simulation::{Execution, SimulationEngine, SkipReason};
