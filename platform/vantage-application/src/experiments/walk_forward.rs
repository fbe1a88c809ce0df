//! Walk-forward analysis: pick parameters on an in-sample window with a grid search, score them
//! on the out-of-sample window that follows, then roll forward by one out-of-sample length.

use crate::backtesting::{series_span, slice_series};
use crate::experiments::error::OptimizeError;
use crate::experiments::grid::GridSearch;
use crate::experiments::params::{ParameterDef, ParameterSet};
use crate::experiments::pool::should_cancelled;
use crate::experiments::summary::{summarize, OptimizationResult, OptimizationSummary};
use crate::experiments::{evaluate_candidate, SearchContext};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{info, info_span, warn};

pub const METHOD: &str = "walk_forward";

/// Window bounds in epoch seconds. Both slices are half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub in_sample_start: i64,
    pub in_sample_end: i64,
    pub out_sample_start: i64,
    pub out_sample_end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowOutcome {
    pub window: WalkForwardWindow,
    pub in_sample_runs: usize,
    /// `None` when no in-sample candidate succeeded.
    pub best_parameters: Option<ParameterSet>,
    pub in_sample_score: Option<f64>,
    pub out_of_sample_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkForwardSummary {
    /// Ranking over out-of-sample results only.
    pub summary: OptimizationSummary,
    pub windows: Vec<WindowOutcome>,
}

/// Rolling windows over the half-open span `[first_ts, end_ts)`. Emits only windows whose
/// out-of-sample end does not pass `end_ts`.
pub fn generate_windows(
    first_ts: i64,
    end_ts: i64,
    in_sample: i64,
    out_of_sample: i64,
) -> Result<Vec<WalkForwardWindow>, OptimizeError> {
    if in_sample <= 0 || out_of_sample <= 0 {
        return Err(OptimizeError::InvalidWindow(format!(
            "window lengths must be positive (in-sample {in_sample}s, out-of-sample {out_of_sample}s)"
        )));
    }
    if end_ts < first_ts {
        return Err(OptimizeError::InvalidWindow(format!(
            "data ends ({end_ts}) before it starts ({first_ts})"
        )));
    }

    let mut windows = Vec::new();
    let mut in_start = first_ts;
    loop {
        let Some(in_end) = in_start.checked_add(in_sample) else {
            break;
        };
        let Some(out_end) = in_end.checked_add(out_of_sample) else {
            break;
        };
        if out_end > end_ts {
            break;
        }
        windows.push(WalkForwardWindow {
            index: windows.len(),
            in_sample_start: in_start,
            in_sample_end: in_end,
            out_sample_start: in_end,
            out_sample_end: out_end,
        });
        in_start += out_of_sample;
    }

    if windows.is_empty() {
        return Err(OptimizeError::NoWindows {
            span: end_ts - first_ts,
            in_sample,
            out_of_sample,
        });
    }
    Ok(windows)
}

#[derive(Debug, Clone)]
pub struct WalkForward {
    grid: GridSearch,
    in_sample: i64,
    out_of_sample: i64,
}

impl WalkForward {
    pub fn new(
        params: Vec<ParameterDef>,
        in_sample: i64,
        out_of_sample: i64,
    ) -> Result<Self, OptimizeError> {
        if in_sample <= 0 || out_of_sample <= 0 {
            return Err(OptimizeError::InvalidWindow(format!(
                "window lengths must be positive (in-sample {in_sample}s, out-of-sample {out_of_sample}s)"
            )));
        }
        Ok(Self {
            grid: GridSearch::new(params)?,
            in_sample,
            out_of_sample,
        })
    }

    pub fn windows(&self, ctx: &SearchContext<'_>) -> Result<Vec<WalkForwardWindow>, OptimizeError> {
        let (first, last) = series_span(ctx.series).ok_or(OptimizeError::EmptyData)?;
        // Slices are half-open, so the span ends one second past the last bar.
        generate_windows(first, last.saturating_add(1), self.in_sample, self.out_of_sample)
    }

    pub fn run(&self, ctx: &SearchContext<'_>) -> Result<WalkForwardSummary, OptimizeError> {
        self.run_with_cancel(ctx, None)
    }

    pub fn run_with_cancel(
        &self,
        ctx: &SearchContext<'_>,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<WalkForwardSummary, OptimizeError> {
        let _span = info_span!(
            "walk_forward",
            objective = %ctx.objective.name(),
            in_sample = self.in_sample,
            out_of_sample = self.out_of_sample
        )
        .entered();
        ctx.validate()?;
        let windows = self.windows(ctx)?;
        info!(windows = windows.len(), "walk-forward windows generated");

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(windows.len());
        let mut oos_results = Vec::new();
        let mut failed_runs = 0usize;

        for window in windows {
            if should_cancelled(should_cancel) {
                return Err(OptimizeError::Cancelled);
            }
            let (outcome, result) = self.run_window(ctx, window, should_cancel)?;
            match result {
                Some(result) => oos_results.push(result),
                None => failed_runs += 1,
            }
            outcomes.push(outcome);
        }

        let total_runs = outcomes.len();
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("vantage.optimizer.run_ms", "method" => METHOD)
            .record(duration_ms as f64);
        info!(
            windows = total_runs,
            failed_windows = failed_runs,
            duration_ms,
            "walk-forward finished"
        );

        Ok(WalkForwardSummary {
            summary: summarize(
                METHOD,
                ctx.objective.name(),
                total_runs,
                failed_runs,
                oos_results,
                ctx.top_n,
                duration_ms,
            ),
            windows: outcomes,
        })
    }

    fn run_window(
        &self,
        ctx: &SearchContext<'_>,
        window: WalkForwardWindow,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<(WindowOutcome, Option<OptimizationResult>), OptimizeError> {
        let mut outcome = WindowOutcome {
            window,
            in_sample_runs: 0,
            best_parameters: None,
            in_sample_score: None,
            out_of_sample_score: None,
        };

        let in_sample = slice_series(ctx.series, window.in_sample_start, window.in_sample_end);
        if in_sample.is_empty() {
            warn!(window = window.index, "no bars in in-sample window");
            return Ok((outcome, None));
        }
        let grid = self.grid.search(ctx, METHOD, &in_sample, should_cancel)?;
        outcome.in_sample_runs = grid.total_runs;

        let Some(best) = grid
            .results
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
        else {
            warn!(window = window.index, "every in-sample candidate failed");
            return Ok((outcome, None));
        };
        outcome.in_sample_score = Some(best.score);
        outcome.best_parameters = Some(best.parameters.clone());

        let out_sample = slice_series(ctx.series, window.out_sample_start, window.out_sample_end);
        if out_sample.is_empty() {
            warn!(window = window.index, "no bars in out-of-sample window");
            return Ok((outcome, None));
        }
        match evaluate_candidate(ctx, &out_sample, &best.parameters) {
            Ok((metrics, score)) => {
                metrics::counter!("vantage.optimizer.candidates_total", "method" => METHOD, "result" => "ok")
                    .increment(1);
                outcome.out_of_sample_score = Some(score);
                let mut result = OptimizationResult::new(METHOD, best.parameters, metrics, score);
                result.run_id = format!("{}__w{}", result.run_id, window.index);
                result.out_of_sample = true;
                result.window = Some(window.index);
                Ok((outcome, Some(result)))
            }
            Err(err) => {
                metrics::counter!("vantage.optimizer.candidates_total", "method" => METHOD, "result" => "error")
                    .increment(1);
                warn!(window = window.index, error = %err, "out-of-sample evaluation failed");
                Ok((outcome, None))
            }
        }
    }
}
