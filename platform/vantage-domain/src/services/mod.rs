pub mod agent;
pub mod consensus;
pub mod engine;
pub mod features;
pub mod sizing;
pub mod strategy;
