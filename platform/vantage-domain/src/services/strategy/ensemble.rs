use crate::services::agent::{Agent, AgentContext, MarketSnapshot};
use crate::services::consensus::ConsensusStrategy;
use crate::services::engine::SimulationEngine;
use crate::services::strategy::{fresh_bars, SignalSource};
use crate::value_objects::side::SignalSide;
use crate::value_objects::signal::Signal;
use tracing::warn;

/// Polls every agent per fresh bar and lets the consensus strategy decide what to execute.
pub struct AgentEnsemble {
    agents: Vec<Box<dyn Agent + Send>>,
    consensus: ConsensusStrategy,
}

impl std::fmt::Debug for AgentEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEnsemble")
            .field("agents", &self.agents.len())
            .field("consensus", &self.consensus)
            .finish()
    }
}

impl AgentEnsemble {
    pub fn new(agents: Vec<Box<dyn Agent + Send>>, consensus: ConsensusStrategy) -> Self {
        Self { agents, consensus }
    }

    pub fn consensus(&self) -> ConsensusStrategy {
        self.consensus
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|agent| agent.name()).collect()
    }
}

impl SignalSource for AgentEnsemble {
    fn name(&self) -> &str {
        "agent_ensemble"
    }

    fn initialize(&mut self, _engine: &SimulationEngine) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("ensemble has no agents".to_string());
        }
        for agent in self.agents.iter_mut() {
            agent
                .reset()
                .map_err(|err| format!("agent {} failed to reset: {err}", agent.name()))?;
        }
        Ok(())
    }

    fn generate_signals(&mut self, engine: &SimulationEngine) -> Result<Vec<Signal>, String> {
        let mut out = Vec::new();
        for bar in fresh_bars(engine) {
            let context = AgentContext {
                timestamp: bar.timestamp,
                cash: engine.cash(),
                equity: engine.total_equity(),
                has_position: engine.position(&bar.instrument).is_some(),
            };
            let snapshot = MarketSnapshot {
                bar,
                history: engine.history(&bar.instrument),
            };

            let mut votes = Vec::with_capacity(self.agents.len());
            for agent in self.agents.iter_mut() {
                match agent.analyze(&context, &snapshot) {
                    Ok(Some(signal)) => votes.push(signal),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(
                            agent = agent.name(),
                            instrument = %bar.instrument,
                            error = %err,
                            "agent analysis failed; treating as abstain"
                        );
                    }
                }
            }

            out.extend(
                self.consensus
                    .resolve(&votes)
                    .into_iter()
                    .filter(|signal| signal.side != SignalSide::Hold),
            );
        }
        Ok(out)
    }
}
