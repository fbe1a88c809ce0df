//! Collapses the signals of several agents for one instrument and step into at most one
//! effective decision.

use crate::error::EngineError;
use crate::value_objects::side::SignalSide;
use crate::value_objects::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStrategy {
    First,
    All,
    #[default]
    Majority,
    Unanimous,
    Weighted,
}

impl ConsensusStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusStrategy::First => "first",
            ConsensusStrategy::All => "all",
            ConsensusStrategy::Majority => "majority",
            ConsensusStrategy::Unanimous => "unanimous",
            ConsensusStrategy::Weighted => "weighted",
        }
    }

    pub fn resolve(&self, signals: &[Signal]) -> Vec<Signal> {
        match self {
            ConsensusStrategy::First => signals.first().cloned().into_iter().collect(),
            ConsensusStrategy::All => signals.to_vec(),
            ConsensusStrategy::Majority => majority(signals).into_iter().collect(),
            ConsensusStrategy::Unanimous => unanimous(signals).into_iter().collect(),
            ConsensusStrategy::Weighted => weighted(signals).into_iter().collect(),
        }
    }
}

impl FromStr for ConsensusStrategy {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "first" => Ok(ConsensusStrategy::First),
            "all" => Ok(ConsensusStrategy::All),
            "majority" => Ok(ConsensusStrategy::Majority),
            "unanimous" => Ok(ConsensusStrategy::Unanimous),
            "weighted" => Ok(ConsensusStrategy::Weighted),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown consensus strategy: {other}"
            ))),
        }
    }
}

fn majority(signals: &[Signal]) -> Option<Signal> {
    let mut votes: BTreeMap<SignalSide, Vec<&Signal>> = BTreeMap::new();
    for signal in signals {
        votes.entry(signal.side).or_default().push(signal);
    }

    let top = votes.values().map(Vec::len).max()?;
    let mut leaders = votes.iter().filter(|(_, voters)| voters.len() == top);
    let (side, voters) = leaders.next()?;
    // A tied plurality has no winner.
    if leaders.next().is_some() || *side == SignalSide::Hold {
        return None;
    }

    let confidence = voters.iter().map(|s| s.confidence).sum::<f64>() / voters.len() as f64;
    let tally = SignalSide::ALL
        .iter()
        .map(|s| format!("{}={}", s, votes.get(s).map_or(0, Vec::len)))
        .collect::<Vec<_>>()
        .join(" ");
    Some(combined(
        voters[0],
        *side,
        confidence,
        format!("majority vote: {tally}"),
        ConsensusStrategy::Majority,
    ))
}

fn unanimous(signals: &[Signal]) -> Option<Signal> {
    let first = signals.first()?;
    if signals.iter().any(|s| s.side != first.side) {
        return None;
    }
    let confidence = signals.iter().map(|s| s.confidence).sum::<f64>() / signals.len() as f64;
    Some(combined(
        first,
        first.side,
        confidence,
        format!("unanimous {} from {} agents", first.side, signals.len()),
        ConsensusStrategy::Unanimous,
    ))
}

fn weighted(signals: &[Signal]) -> Option<Signal> {
    let mut totals: BTreeMap<SignalSide, (f64, &Signal)> = BTreeMap::new();
    for signal in signals {
        totals
            .entry(signal.side)
            .and_modify(|(sum, _)| *sum += signal.confidence)
            .or_insert((signal.confidence, signal));
    }

    let best = totals
        .values()
        .map(|(sum, _)| *sum)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut leaders = totals.iter().filter(|(_, (sum, _))| *sum == best);
    let (side, (total, exemplar)) = leaders.next()?;
    if leaders.next().is_some() || *side == SignalSide::Hold {
        return None;
    }

    let weights = SignalSide::ALL
        .iter()
        .map(|s| format!("{}={:.3}", s, totals.get(s).map_or(0.0, |(sum, _)| *sum)))
        .collect::<Vec<_>>()
        .join(" ");
    Some(combined(
        exemplar,
        *side,
        total / signals.len() as f64,
        format!("weighted vote: {weights}"),
        ConsensusStrategy::Weighted,
    ))
}

fn combined(
    exemplar: &Signal,
    side: SignalSide,
    confidence: f64,
    rationale: String,
    strategy: ConsensusStrategy,
) -> Signal {
    Signal::new(
        exemplar.timestamp,
        exemplar.instrument.clone(),
        side,
        confidence,
        rationale,
        format!("consensus:{}", strategy.as_str()),
    )
}
