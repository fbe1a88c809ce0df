//! Evolutionary search: elitism, tournament selection, uniform crossover and per-gene mutation.
//!
//! All random draws happen on the calling thread from one owned `ChaCha8Rng`; only fitness
//! evaluation is spread over the worker pool. A fixed seed therefore reproduces the same run
//! regardless of parallelism.

use crate::experiments::error::OptimizeError;
use crate::experiments::params::{validate_params, ParameterDef, ParameterSet};
use crate::experiments::summary::{rank_results, summarize, OptimizationResult, OptimizationSummary};
use crate::experiments::{evaluate_batch, SearchContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, info_span};

pub const METHOD: &str = "genetic";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneticSettings {
    pub population_size: usize,
    pub generations: usize,
    /// Share of each generation copied unchanged into the next.
    pub elite_fraction: f64,
    pub tournament_size: usize,
    /// Per-parameter probability of resampling a child's value.
    pub mutation_rate: f64,
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GeneticSettings {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 10,
            elite_fraction: 0.1,
            tournament_size: 3,
            mutation_rate: 0.1,
            seed: None,
        }
    }
}

impl GeneticSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.population_size < 2 {
            return Err(format!(
                "population_size must be >= 2, got {}",
                self.population_size
            ));
        }
        if self.generations == 0 {
            return Err("generations must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.elite_fraction) {
            return Err(format!(
                "elite_fraction must be in [0, 1], got {}",
                self.elite_fraction
            ));
        }
        if self.tournament_size == 0 {
            return Err("tournament_size must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(format!(
                "mutation_rate must be in [0, 1], got {}",
                self.mutation_rate
            ));
        }
        Ok(())
    }

    pub fn elite_count(&self) -> usize {
        ((self.population_size as f64 * self.elite_fraction).round() as usize)
            .min(self.population_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationStats {
    pub generation: usize,
    /// `NEG_INFINITY` when every individual failed.
    pub best_score: f64,
    pub mean_score: Option<f64>,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneticSummary {
    pub summary: OptimizationSummary,
    pub history: Vec<GenerationStats>,
}

#[derive(Debug, Clone)]
pub struct GeneticSearch {
    params: Vec<ParameterDef>,
    settings: GeneticSettings,
}

struct Scored {
    params: ParameterSet,
    score: f64,
}

impl GeneticSearch {
    pub fn new(params: Vec<ParameterDef>, settings: GeneticSettings) -> Result<Self, OptimizeError> {
        if params.is_empty() {
            return Err(OptimizeError::InvalidParameter(
                "genetic search needs at least one parameter".to_string(),
            ));
        }
        validate_params(&params).map_err(OptimizeError::InvalidParameter)?;
        settings.validate().map_err(OptimizeError::InvalidGenetic)?;
        Ok(Self { params, settings })
    }

    pub fn settings(&self) -> &GeneticSettings {
        &self.settings
    }

    pub fn run(&self, ctx: &SearchContext<'_>) -> Result<GeneticSummary, OptimizeError> {
        self.run_with_cancel(ctx, None)
    }

    pub fn run_with_cancel(
        &self,
        ctx: &SearchContext<'_>,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<GeneticSummary, OptimizeError> {
        let settings = self.settings;
        let _span = info_span!(
            "genetic_search",
            objective = %ctx.objective.name(),
            population = settings.population_size,
            generations = settings.generations,
            seed = ?settings.seed
        )
        .entered();
        ctx.validate()?;

        let started = Instant::now();
        let mut rng = match settings.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut population = (0..settings.population_size)
            .map(|_| self.random_individual(&mut rng))
            .collect::<Result<Vec<_>, _>>()?;

        let mut all_results: Vec<OptimizationResult> = Vec::new();
        let mut history = Vec::with_capacity(settings.generations);
        let mut total_runs = 0usize;
        let mut failed_runs = 0usize;

        for generation in 0..settings.generations {
            let outcomes = evaluate_batch(ctx, METHOD, ctx.series, &population, should_cancel)?;
            total_runs += population.len();

            let mut scored = Vec::with_capacity(population.len());
            let mut failed = 0usize;
            for (params, outcome) in population.into_iter().zip(outcomes) {
                match outcome {
                    Ok((metrics, score)) => {
                        let mut result =
                            OptimizationResult::new(METHOD, params.clone(), metrics, score);
                        result.generation = Some(generation);
                        all_results.push(result);
                        scored.push(Scored { params, score });
                    }
                    Err(_) => {
                        failed += 1;
                        scored.push(Scored {
                            params,
                            score: f64::NEG_INFINITY,
                        });
                    }
                }
            }
            failed_runs += failed;

            let stats = generation_stats(generation, &scored, failed);
            debug!(
                generation,
                best_score = stats.best_score,
                failed,
                "generation evaluated"
            );
            history.push(stats);

            if generation + 1 == settings.generations {
                break;
            }
            population = self.next_generation(scored, &mut rng)?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("vantage.optimizer.run_ms", "method" => METHOD)
            .record(duration_ms as f64);
        info!(total_runs, failed_runs, duration_ms, "genetic search finished");

        // Elites are re-evaluated every generation; keep each parameter set once, at its best.
        rank_results(&mut all_results);
        let mut seen = BTreeSet::new();
        all_results.retain(|result| seen.insert(result.run_id.clone()));

        Ok(GeneticSummary {
            summary: summarize(
                METHOD,
                ctx.objective.name(),
                total_runs,
                failed_runs,
                all_results,
                ctx.top_n,
                duration_ms,
            ),
            history,
        })
    }

    fn random_individual(&self, rng: &mut ChaCha8Rng) -> Result<ParameterSet, OptimizeError> {
        let mut individual = ParameterSet::new();
        for def in &self.params {
            let value = def.sample(rng).map_err(OptimizeError::InvalidParameter)?;
            individual.insert(def.name.clone(), value);
        }
        Ok(individual)
    }

    fn next_generation(
        &self,
        mut scored: Vec<Scored>,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<ParameterSet>, OptimizeError> {
        let size = self.settings.population_size;
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut next: Vec<ParameterSet> = scored
            .iter()
            .take(self.settings.elite_count())
            .map(|s| s.params.clone())
            .collect();

        while next.len() < size {
            let first = tournament(&scored, self.settings.tournament_size, rng);
            let second = tournament(&scored, self.settings.tournament_size, rng);
            let mut child = self.crossover(first, second, rng)?;
            self.mutate(&mut child, rng)?;
            next.push(child);
        }
        Ok(next)
    }

    fn crossover(
        &self,
        first: &ParameterSet,
        second: &ParameterSet,
        rng: &mut ChaCha8Rng,
    ) -> Result<ParameterSet, OptimizeError> {
        let mut child = ParameterSet::new();
        for def in &self.params {
            let parent = if rng.gen_bool(0.5) { first } else { second };
            let value = match parent.get(&def.name) {
                Some(value) => value.clone(),
                None => def.sample(rng).map_err(OptimizeError::InvalidParameter)?,
            };
            child.insert(def.name.clone(), value);
        }
        Ok(child)
    }

    fn mutate(&self, child: &mut ParameterSet, rng: &mut ChaCha8Rng) -> Result<(), OptimizeError> {
        for def in &self.params {
            if rng.gen_bool(self.settings.mutation_rate) {
                let value = def.sample(rng).map_err(OptimizeError::InvalidParameter)?;
                child.insert(def.name.clone(), value);
            }
        }
        Ok(())
    }
}

/// Draws `size` individuals with replacement and returns the fittest (first wins ties).
fn tournament<'a>(scored: &'a [Scored], size: usize, rng: &mut ChaCha8Rng) -> &'a ParameterSet {
    let mut best = &scored[rng.gen_range(0..scored.len())];
    for _ in 1..size {
        let challenger = &scored[rng.gen_range(0..scored.len())];
        if challenger.score > best.score {
            best = challenger;
        }
    }
    &best.params
}

fn generation_stats(generation: usize, scored: &[Scored], failed: usize) -> GenerationStats {
    let finite: Vec<f64> = scored
        .iter()
        .map(|s| s.score)
        .filter(|score| score.is_finite())
        .collect();
    GenerationStats {
        generation,
        best_score: scored
            .iter()
            .map(|s| s.score)
            .fold(f64::NEG_INFINITY, f64::max),
        mean_score: (!finite.is_empty())
            .then(|| finite.iter().sum::<f64>() / finite.len() as f64),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::params::ParamValue;

    fn scored(scores: &[f64]) -> Vec<Scored> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| Scored {
                params: ParameterSet::new().with("i", ParamValue::Int(i as i64)),
                score: *score,
            })
            .collect()
    }

    #[test]
    fn settings_validation() {
        assert!(GeneticSettings::default().validate().is_ok());
        let bad = [
            GeneticSettings {
                population_size: 1,
                ..GeneticSettings::default()
            },
            GeneticSettings {
                generations: 0,
                ..GeneticSettings::default()
            },
            GeneticSettings {
                elite_fraction: 1.5,
                ..GeneticSettings::default()
            },
            GeneticSettings {
                tournament_size: 0,
                ..GeneticSettings::default()
            },
            GeneticSettings {
                mutation_rate: -0.1,
                ..GeneticSettings::default()
            },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
    }

    #[test]
    fn elite_count_rounds() {
        let settings = GeneticSettings {
            population_size: 10,
            elite_fraction: 0.25,
            ..GeneticSettings::default()
        };
        assert_eq!(settings.elite_count(), 3);
        let all = GeneticSettings {
            elite_fraction: 1.0,
            ..settings
        };
        assert_eq!(all.elite_count(), 10);
    }

    #[test]
    fn large_tournament_picks_the_fittest() {
        let pool = scored(&[1.0, f64::NEG_INFINITY, 5.0, 3.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let winner = tournament(&pool, 64, &mut rng);
        assert_eq!(winner.get_int("i"), Some(2));
    }

    #[test]
    fn failed_individuals_never_win_against_real_scores() {
        let pool = scored(&[f64::NEG_INFINITY, 0.5]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..32 {
            let winner = tournament(&pool, 64, &mut rng);
            assert_eq!(winner.get_int("i"), Some(1));
        }
    }

    #[test]
    fn generation_stats_ignore_failures_in_mean() {
        let stats = generation_stats(3, &scored(&[1.0, 3.0, f64::NEG_INFINITY]), 1);
        assert_eq!(stats.best_score, 3.0);
        assert_eq!(stats.mean_score, Some(2.0));
        assert_eq!(stats.failed, 1);

        let stats = generation_stats(0, &scored(&[f64::NEG_INFINITY]), 1);
        assert_eq!(stats.best_score, f64::NEG_INFINITY);
        assert_eq!(stats.mean_score, None);
    }

    #[test]
    fn requires_parameters() {
        assert!(matches!(
            GeneticSearch::new(Vec::new(), GeneticSettings::default()),
            Err(OptimizeError::InvalidParameter(_))
        ));
        assert!(matches!(
            GeneticSearch::new(
                vec![ParameterDef::int_range("lookback", 2, 10, 1)],
                GeneticSettings {
                    generations: 0,
                    ..GeneticSettings::default()
                }
            ),
            Err(OptimizeError::InvalidGenetic(_))
        ));
    }
}
