use crate::experiments::genetic::GeneticSettings;
use crate::experiments::objective::ObjectiveKind;
use crate::experiments::params::{validate_params, ParameterDef};
use crate::experiments::summary::DEFAULT_TOP_N;
use crate::shared::{parse_duration_like, parse_timestamp_seconds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use vantage_domain::entities::metrics::MetricsConfig as DomainMetricsConfig;
use vantage_domain::services::consensus::ConsensusStrategy;
use vantage_domain::services::engine::EngineConfig;
use vantage_domain::services::sizing::{SizingPolicy, DEFAULT_FIXED_NOTIONAL};
use vantage_domain::value_objects::date_range::DateRange;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub costs: CostsConfig,
    pub risk: Option<RiskConfig>,
    pub sizing: Option<SizingConfig>,
    pub metrics: Option<MetricsConfig>,
    pub consensus: Option<ConsensusConfig>,
    pub optimizer: Option<OptimizerConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParameterDef>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub initial_capital: f64,
    /// Epoch seconds or RFC3339.
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    /// Fraction of notional per fill (0.001 = 0.1%).
    pub commission_pct: f64,
    #[serde(default)]
    pub slippage_bps: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    pub max_positions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SizingConfig {
    pub policy: String,
    pub fixed_notional: Option<f64>,
    pub percent_fraction: Option<f64>,
    pub kelly_multiplier: Option<f64>,
    pub kelly_use_history: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub risk_free_rate: Option<f64>,
    pub periods_per_year: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConsensusConfig {
    pub strategy: ConsensusStrategy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    Grid,
    WalkForward,
    Genetic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    pub method: OptimizerMethod,
    pub objective: Option<ObjectiveKind>,
    pub parallelism: Option<usize>,
    pub top_n: Option<usize>,
    pub walk_forward: Option<WalkForwardConfig>,
    pub genetic: Option<GeneticConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardConfig {
    /// Duration label (`90d`, `12h`) or seconds.
    pub in_sample: String,
    pub out_of_sample: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GeneticConfig {
    pub population_size: Option<usize>,
    pub generations: Option<usize>,
    pub elite_fraction: Option<f64>,
    pub tournament_size: Option<usize>,
    pub mutation_rate: Option<f64>,
    pub seed: Option<u64>,
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}

impl Config {
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        let defaults = EngineConfig::default();
        let sizing_cfg = self.sizing.as_ref();
        let sizing = match sizing_cfg {
            Some(cfg) => SizingPolicy::from_name(
                &cfg.policy,
                cfg.fixed_notional.unwrap_or(DEFAULT_FIXED_NOTIONAL),
                cfg.percent_fraction.unwrap_or(0.1),
                cfg.kelly_multiplier.unwrap_or(0.25),
            ),
            None => SizingPolicy::default(),
        };
        let engine = EngineConfig {
            initial_capital: self.run.initial_capital,
            commission_rate: self.costs.commission_pct,
            slippage_bps: self.costs.slippage_bps,
            max_positions: self
                .risk
                .as_ref()
                .map_or(defaults.max_positions, |risk| risk.max_positions),
            sizing,
            kelly_use_history: sizing_cfg
                .and_then(|cfg| cfg.kelly_use_history)
                .unwrap_or(false),
        };
        engine.validate().map_err(|err| err.to_string())?;
        Ok(engine)
    }

    pub fn metrics_config(&self) -> Result<DomainMetricsConfig, String> {
        let defaults = DomainMetricsConfig::default();
        let Some(cfg) = self.metrics.as_ref() else {
            return Ok(defaults);
        };
        let out = DomainMetricsConfig {
            risk_free_rate: cfg.risk_free_rate.unwrap_or(defaults.risk_free_rate),
            periods_per_year: cfg.periods_per_year.unwrap_or(defaults.periods_per_year),
        };
        if !out.risk_free_rate.is_finite() {
            return Err("metrics.risk_free_rate must be finite".to_string());
        }
        if !out.periods_per_year.is_finite() || out.periods_per_year <= 0.0 {
            return Err("metrics.periods_per_year must be positive".to_string());
        }
        Ok(out)
    }

    pub fn consensus_strategy(&self) -> ConsensusStrategy {
        self.consensus
            .as_ref()
            .map(|cfg| cfg.strategy)
            .unwrap_or_default()
    }

    pub fn date_range(&self) -> Result<DateRange, String> {
        let start = self
            .run
            .start
            .as_deref()
            .map(parse_timestamp_seconds)
            .transpose()?;
        let end = self
            .run
            .end
            .as_deref()
            .map(parse_timestamp_seconds)
            .transpose()?;
        DateRange::new(start, end).map_err(|err| err.to_string())
    }

    pub fn parameter_defs(&self) -> Result<&[ParameterDef], String> {
        validate_params(&self.params)?;
        Ok(&self.params)
    }
}

impl OptimizerConfig {
    pub fn objective(&self) -> ObjectiveKind {
        self.objective.unwrap_or_default()
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(DEFAULT_TOP_N).max(1)
    }

    /// In-sample and out-of-sample lengths in seconds.
    pub fn walk_forward_windows(&self) -> Result<(i64, i64), String> {
        let cfg = self
            .walk_forward
            .as_ref()
            .ok_or_else(|| "optimizer.walk_forward section is required".to_string())?;
        let in_sample = parse_duration_like(&cfg.in_sample)?;
        let out_of_sample = parse_duration_like(&cfg.out_of_sample)?;
        if in_sample <= 0 || out_of_sample <= 0 {
            return Err("walk-forward window lengths must be positive".to_string());
        }
        Ok((in_sample, out_of_sample))
    }

    pub fn genetic_settings(&self) -> Result<GeneticSettings, String> {
        let defaults = GeneticSettings::default();
        let Some(cfg) = self.genetic.as_ref() else {
            return Ok(defaults);
        };
        let settings = GeneticSettings {
            population_size: cfg.population_size.unwrap_or(defaults.population_size),
            generations: cfg.generations.unwrap_or(defaults.generations),
            elite_fraction: cfg.elite_fraction.unwrap_or(defaults.elite_fraction),
            tournament_size: cfg.tournament_size.unwrap_or(defaults.tournament_size),
            mutation_rate: cfg.mutation_rate.unwrap_or(defaults.mutation_rate),
            seed: cfg.seed.or(defaults.seed),
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[run]
run_id = "btc_daily"
initial_capital = 10000.0

[costs]
commission_pct = 0.001
"#;

    fn parse_config(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    #[test]
    fn parse_config_rejects_malformed_toml() {
        let err = toml::from_str::<Config>("[run\nrun_id = 1").expect_err("malformed");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let toml_str = format!("{MINIMAL}\n[risk]\nmax_positions = 2\nmax_leverage = 3\n");
        let err = toml::from_str::<Config>(&toml_str).expect_err("unknown field should fail");
        assert!(err.to_string().to_lowercase().contains("unknown field"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL);
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.initial_capital, 10_000.0);
        assert_eq!(engine.commission_rate, 0.001);
        assert_eq!(engine.max_positions, 10);
        assert_eq!(engine.sizing, SizingPolicy::default());
        assert!(!engine.kelly_use_history);
        assert_eq!(config.metrics_config().unwrap(), DomainMetricsConfig::default());
        assert_eq!(config.consensus_strategy(), ConsensusStrategy::Majority);
        assert_eq!(config.date_range().unwrap(), DateRange::default());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[run]
run_id = "btc_daily_wf"
initial_capital = 25000.0
start = "2024-01-01T00:00:00Z"
end = "1735689600"

[costs]
commission_pct = 0.0005
slippage_bps = 2.5

[risk]
max_positions = 3

[sizing]
policy = "kelly"
kelly_multiplier = 0.5
kelly_use_history = true

[metrics]
risk_free_rate = 0.0
periods_per_year = 365

[consensus]
strategy = "weighted"

[optimizer]
method = "walk_forward"
objective = "sortino"
parallelism = 4

[optimizer.walk_forward]
in_sample = "90d"
out_of_sample = "30d"

[[params]]
name = "short_window"
type = "int"
min = 5
max = 20
step = 5

[[params]]
name = "strategy"
type = "string"
values = ["sma_crossover"]
"#;
        let config = parse_config(toml_str);
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.sizing, SizingPolicy::Kelly { multiplier: 0.5 });
        assert!(engine.kelly_use_history);
        assert_eq!(engine.max_positions, 3);
        assert_eq!(config.consensus_strategy(), ConsensusStrategy::Weighted);
        let range = config.date_range().unwrap();
        assert_eq!(range.start, Some(1_704_067_200));
        assert_eq!(range.end, Some(1_735_689_600));

        let optimizer = config.optimizer.as_ref().unwrap();
        assert_eq!(optimizer.method, OptimizerMethod::WalkForward);
        assert_eq!(optimizer.objective(), ObjectiveKind::Sortino);
        assert_eq!(optimizer.top_n(), 10);
        assert_eq!(
            optimizer.walk_forward_windows().unwrap(),
            (90 * 86_400, 30 * 86_400)
        );
        assert_eq!(config.parameter_defs().unwrap().len(), 2);

        let rendered = to_toml_pretty(&config).unwrap();
        let reparsed = parse_config(&rendered);
        assert_eq!(reparsed.params, config.params);
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let toml_str = r#"
[run]
run_id = "x"
initial_capital = 100.0
start = "200"
end = "100"

[costs]
commission_pct = 0.0
"#;
        assert!(parse_config(toml_str).date_range().is_err());
    }

    #[test]
    fn invalid_capital_fails_engine_conversion() {
        let toml_str = MINIMAL.replace("10000.0", "0.0");
        assert!(parse_config(&toml_str).engine_config().is_err());
    }

    #[test]
    fn genetic_settings_fill_defaults_and_validate() {
        let toml_str = format!(
            "{MINIMAL}\n[optimizer]\nmethod = \"genetic\"\n\n[optimizer.genetic]\npopulation_size = 12\nseed = 42\n"
        );
        let config = parse_config(&toml_str);
        let settings = config.optimizer.unwrap().genetic_settings().unwrap();
        assert_eq!(settings.population_size, 12);
        assert_eq!(settings.seed, Some(42));
        assert_eq!(settings.generations, GeneticSettings::default().generations);
    }

    #[test]
    fn walk_forward_rejects_non_ascii_duration_unit() {
        let toml_str = format!(
            "{MINIMAL}\n[optimizer]\nmethod = \"walk_forward\"\n\n[optimizer.walk_forward]\nin_sample = \"90д\"\nout_of_sample = \"30d\"\n"
        );
        let config = parse_config(&toml_str);
        let err = config.optimizer.unwrap().walk_forward_windows().unwrap_err();
        assert!(err.contains("unsupported duration unit"), "{err}");
    }
}
