use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use vantage_application::backtesting::{run_backtest, BacktestSettings, SeriesMap};
use vantage_application::config::{load_config, Config, OptimizerMethod};
use vantage_application::experiments::factory::build_strategy;
use vantage_application::experiments::genetic::{GeneticSearch, GeneticSettings};
use vantage_application::experiments::grid::GridSearch;
use vantage_application::experiments::objective::ObjectiveKind;
use vantage_application::experiments::params::{ParamKind, ParamValue, ParameterDef, ParameterSet};
use vantage_application::experiments::pool::normalize_parallelism;
use vantage_application::experiments::summary::OptimizationSummary;
use vantage_application::experiments::walk_forward::WalkForward;
use vantage_application::experiments::{builtin_factory, SearchContext};
use vantage_domain::services::engine::EngineConfig;
use vantage_domain::value_objects::bar::Bar;

#[derive(Parser)]
#[command(name = "vantage-bench")]
#[command(about = "Synthetic benchmark tool for Vantage (dev)")]
struct Args {
    /// Number of synthetic bars per instrument.
    #[arg(long, default_value_t = 5_000)]
    bars: usize,

    /// Number of synthetic instruments.
    #[arg(long, default_value_t = 1)]
    instruments: usize,

    /// Timestamp step in seconds between bars.
    #[arg(long, default_value_t = 86_400)]
    step_seconds: i64,

    /// backtest, grid, walk-forward or genetic. Ignored for searches when --config sets
    /// `[optimizer] method`.
    #[arg(long, default_value = "backtest")]
    mode: String,

    /// Strategy for backtest mode (buy_and_hold, sma_crossover, momentum, ensemble).
    #[arg(long, default_value = "sma_crossover")]
    strategy: String,

    /// Objective for searches (sharpe, sortino, calmar, total_return, ...).
    #[arg(long)]
    objective: Option<String>,

    /// Maximum concurrent candidate backtests.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Seed for synthetic data and the genetic search.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// TOML run configuration; its engine, metrics, optimizer and `[[params]]` sections replace
    /// the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a single JSON line instead of human output.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Prometheus metrics listen addr (e.g. 127.0.0.1:9898). Optional.
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Write a CPU profile as an SVG flamegraph to this path (requires feature `pprof`).
    #[arg(long)]
    profile_svg: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_tracing() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = init_metrics(args.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run_bench(args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<(), String> {
    let filter = std::env::var("VANTAGE_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

#[cfg(feature = "prometheus")]
fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = metrics_addr else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid --metrics-addr (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    if metrics_addr.is_some() {
        return Err("metrics exporter requires vantage-bench feature `prometheus`".to_string());
    }
    Ok(None)
}

/// Geometric random walk per instrument, all sharing the same timestamps.
fn synthetic_series(instruments: usize, bars: usize, step_seconds: i64, seed: u64) -> SeriesMap {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..instruments.max(1))
        .map(|idx| {
            let instrument = format!("SYN{idx}");
            let mut close = rng.gen_range(50.0..150.0);
            let series = (0..bars)
                .map(|i| {
                    let open = close;
                    close *= 1.0 + rng.gen_range(-0.02..0.0205);
                    Bar {
                        instrument: instrument.clone(),
                        timestamp: i as i64 * step_seconds,
                        open,
                        high: open.max(close) * 1.002,
                        low: open.min(close) * 0.998,
                        close,
                        volume: rng.gen_range(100.0..10_000.0),
                    }
                })
                .collect();
            (instrument, series)
        })
        .collect()
}

fn default_params() -> Vec<ParameterDef> {
    vec![
        ParameterDef::choices(
            "strategy",
            ParamKind::String,
            vec![ParamValue::Str("sma_crossover".to_string())],
        ),
        ParameterDef::int_range("short_window", 5, 20, 5),
        ParameterDef::int_range("long_window", 30, 90, 15),
    ]
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
            .map_err(|err| format!("failed to create {}: {err}", dir.display())),
        _ => Ok(()),
    }
}

fn run_bench(args: Args) -> Result<(), String> {
    let mode = args.mode.trim().to_lowercase();

    #[cfg(feature = "pprof")]
    let guard = if let Some(path) = &args.profile_svg {
        ensure_parent_dir(path)?;
        Some(
            pprof::ProfilerGuard::new(100)
                .map_err(|err| format!("failed to start profiler: {err}"))?,
        )
    } else {
        None
    };

    #[cfg(not(feature = "pprof"))]
    if args.profile_svg.is_some() {
        return Err("profiling requires vantage-bench feature `pprof`".to_string());
    }

    let config = args.config.as_deref().map(load_config).transpose()?;
    let series = synthetic_series(args.instruments, args.bars, args.step_seconds, args.seed);
    let bars_total: usize = series.values().map(Vec::len).sum();

    let started = Instant::now();
    let line = match mode.as_str() {
        "backtest" => bench_backtest(&args, config.as_ref(), &series)?,
        "grid" | "walk-forward" | "walk_forward" | "genetic" => {
            bench_search(&args, &mode, config.as_ref(), &series)?
        }
        other => return Err(format!("unknown mode: {other}")),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    metrics::histogram!("vantage.bench.elapsed_ms", "mode" => mode.clone())
        .record(elapsed_ms as f64);

    #[cfg(feature = "pprof")]
    if let (Some(guard), Some(path)) = (guard, &args.profile_svg) {
        let report = guard
            .report()
            .build()
            .map_err(|err| format!("failed to build profile report: {err}"))?;
        let file = std::fs::File::create(path)
            .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
        report
            .flamegraph(file)
            .map_err(|err| format!("failed to write flamegraph: {err}"))?;
        tracing::info!(profile_svg = %path.display(), "wrote cpu profile flamegraph");
    }

    if args.json {
        let mut line = line;
        line["mode"] = serde_json::json!(mode);
        line["bars"] = serde_json::json!(bars_total);
        line["elapsed_ms"] = serde_json::json!(elapsed_ms);
        println!("{line}");
    } else {
        println!("bench: mode={mode} bars={bars_total} elapsed_ms={elapsed_ms}");
        println!("{}", render_human(&line));
    }
    Ok(())
}

fn bench_backtest(
    args: &Args,
    config: Option<&Config>,
    series: &SeriesMap,
) -> Result<serde_json::Value, String> {
    let mut settings = match config {
        Some(config) => BacktestSettings::from_config(config)?,
        None => BacktestSettings::new("bench", EngineConfig::default()),
    };
    if config.is_none() {
        settings.engine.max_positions = args.instruments.max(1);
    }
    let mut params =
        ParameterSet::new().with("strategy", ParamValue::Str(args.strategy.trim().to_string()));
    if let Some(consensus) = config.and_then(|c| c.consensus.as_ref()) {
        params.insert(
            "consensus",
            ParamValue::Str(consensus.strategy.as_str().to_string()),
        );
    }
    let mut strategy = build_strategy(&params)?;
    let report = run_backtest(&settings, series, &mut strategy).map_err(|err| err.to_string())?;

    let m = &report.metrics;
    Ok(serde_json::json!({
        "source": report.source,
        "trades": report.trades.len(),
        "closed_positions": report.closed_positions.len(),
        "final_equity": m.final_equity,
        "total_return_pct": m.total_return_pct,
        "sharpe": m.sharpe,
        "sortino": m.sortino,
        "max_drawdown_pct": m.max_drawdown_pct,
        "win_rate_pct": m.win_rate_pct,
    }))
}

fn bench_search(
    args: &Args,
    mode: &str,
    config: Option<&Config>,
    series: &SeriesMap,
) -> Result<serde_json::Value, String> {
    let optimizer = config.and_then(|c| c.optimizer.as_ref());
    let objective = match (&args.objective, optimizer) {
        (Some(raw), _) => raw.parse::<ObjectiveKind>()?,
        (None, Some(opt)) => opt.objective(),
        (None, None) => ObjectiveKind::default(),
    };
    let parallelism = normalize_parallelism(
        args.parallelism
            .or_else(|| optimizer.and_then(|opt| opt.parallelism))
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get())),
    );
    let params = match config {
        Some(config) if !config.params.is_empty() => config.parameter_defs()?.to_vec(),
        _ => default_params(),
    };

    let mut ctx = SearchContext::new(series, &builtin_factory, &objective)
        .with_parallelism(parallelism);
    if let Some(config) = config {
        ctx = ctx
            .with_engine(config.engine_config()?)
            .with_metrics(config.metrics_config()?);
    }
    if let Some(opt) = optimizer {
        ctx = ctx.with_top_n(opt.top_n());
    }

    let method = match optimizer.map(|opt| opt.method) {
        Some(method) => method,
        None => match mode {
            "grid" => OptimizerMethod::Grid,
            "genetic" => OptimizerMethod::Genetic,
            _ => OptimizerMethod::WalkForward,
        },
    };

    match method {
        OptimizerMethod::Grid => {
            let summary = GridSearch::new(params)
                .and_then(|grid| grid.run(&ctx))
                .map_err(|err| err.to_string())?;
            Ok(summary_json(&summary))
        }
        OptimizerMethod::WalkForward => {
            let (in_sample, out_of_sample) = match optimizer {
                Some(opt) => opt.walk_forward_windows()?,
                None => {
                    let span = (args.bars as i64).saturating_mul(args.step_seconds);
                    (span / 4, span / 8)
                }
            };
            let result = WalkForward::new(params, in_sample, out_of_sample)
                .and_then(|wf| wf.run(&ctx))
                .map_err(|err| err.to_string())?;
            let mut line = summary_json(&result.summary);
            line["windows"] = serde_json::json!(result.windows.len());
            Ok(line)
        }
        OptimizerMethod::Genetic => {
            let settings = match optimizer {
                Some(opt) => opt.genetic_settings()?,
                None => GeneticSettings {
                    seed: Some(args.seed),
                    ..GeneticSettings::default()
                },
            };
            let result = GeneticSearch::new(params, settings)
                .and_then(|search| search.run(&ctx))
                .map_err(|err| err.to_string())?;
            let mut line = summary_json(&result.summary);
            line["generations"] = serde_json::json!(result.history.len());
            Ok(line)
        }
    }
}

fn summary_json(summary: &OptimizationSummary) -> serde_json::Value {
    serde_json::json!({
        "method": summary.method,
        "objective": summary.objective,
        "total_runs": summary.total_runs,
        "failed_runs": summary.failed_runs,
        "search_ms": summary.duration_ms,
        "best_score": summary.best.as_ref().map(|best| best.score),
        "best_parameters": summary.best.as_ref().map(|best| best.parameters.to_string()),
    })
}

fn render_human(line: &serde_json::Value) -> String {
    let Some(fields) = line.as_object() else {
        return line.to_string();
    };
    let parts: Vec<String> = fields
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect();
    format!("bench: {}", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_temp_dir(prefix: &str) -> PathBuf {
        let unique = format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before UNIX_EPOCH")
                .as_nanos()
        );
        std::env::temp_dir().join(unique)
    }

    #[test]
    fn parent_dir_is_created_or_reported() {
        let root = test_temp_dir("vantage_bench_profile");
        let target = root.join("nested").join("flame.svg");
        ensure_parent_dir(&target).unwrap();
        assert!(root.join("nested").is_dir());

        ensure_parent_dir(Path::new("flame.svg")).unwrap();

        let blocker = root.join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let err = ensure_parent_dir(&blocker.join("flame.svg")).unwrap_err();
        assert!(err.contains("failed to create"), "{err}");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn synthetic_series_is_seeded() {
        let a = synthetic_series(2, 50, 60, 7);
        let b = synthetic_series(2, 50, 60, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.values().all(|bars| bars.len() == 50));
    }
}
