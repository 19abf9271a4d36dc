//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section and field has a default, so a partial file (or none of a section)
//! is valid. Secrets (API keys) are referenced by env-var name in the config
//! and resolved at runtime.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::decision::{DecisionConfig, SizingMode};
use crate::engine::scanner::{ScanFilter, MAX_CANDIDATES};
use crate::predictor::PredictorConfig;
use crate::storage::DEFAULT_MODEL_FILE;
use crate::strategy::exits::ExitPolicy;
use crate::strategy::regime::RegimeConfig;
use crate::types::EngineError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub scanner: ScannerConfig,
    pub predictor: PredictorSection,
    pub regime: RegimeSection,
    pub exits: ExitsConfig,
    pub data: DataConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_equity: f64,
    pub max_open_positions: usize,
    pub notional_per_trade: f64,
    /// Positive dollars; the breaker trips below the negative of this.
    pub daily_loss_limit: f64,
    pub sizing: SizingMode,
    pub min_score: f64,
    pub strategy_tag: String,
    pub scan_interval_secs: u64,
    pub scan_timeout_secs: u64,
    pub session_start_hour_utc: u32,
    pub session_end_hour_utc: u32,
    pub require_above_vwap: bool,
    pub require_near_high: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_equity: 25_000.0,
            max_open_positions: 5,
            notional_per_trade: 10_000.0,
            daily_loss_limit: 2_000.0,
            sizing: SizingMode::Notional,
            min_score: 0.5,
            strategy_tag: "GAPPER_MOMENTUM".into(),
            scan_interval_secs: 20,
            scan_timeout_secs: 15,
            session_start_hour_utc: 13,
            session_end_hour_utc: 20,
            require_above_vwap: true,
            require_near_high: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub min_change_pct: f64,
    pub min_volume: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub max_candidates: usize,
    pub min_relative_volume: Option<f64>,
    pub max_market_cap: Option<f64>,
    pub max_float_shares: Option<f64>,
    /// Look up halts and short-sale restrictions and drop those symbols.
    pub exclude_restricted: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let f = ScanFilter::default();
        Self {
            min_change_pct: f.min_change_pct,
            min_volume: f.min_volume,
            min_price: f.min_price,
            max_price: f.max_price,
            max_candidates: f.max_candidates,
            min_relative_volume: f.min_relative_volume,
            max_market_cap: f.max_market_cap,
            max_float_shares: f.max_float_shares,
            exclude_restricted: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictorSection {
    pub model_path: String,
    pub learning_rate: f64,
    pub learn: bool,
    pub max_pending_entries: Option<usize>,
    pub max_pending_age_secs: Option<u64>,
}

impl Default for PredictorSection {
    fn default() -> Self {
        Self {
            model_path: DEFAULT_MODEL_FILE.into(),
            learning_rate: 0.05,
            learn: true,
            max_pending_entries: None,
            max_pending_age_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegimeSection {
    pub basket: Vec<String>,
    pub bars_per_day: f64,
    /// Bars requested per basket symbol.
    pub lookback: usize,
}

impl Default for RegimeSection {
    fn default() -> Self {
        Self {
            basket: RegimeConfig::default().basket,
            bars_per_day: 390.0,
            lookback: 70,
        }
    }
}

/// Percent thresholds as fractions. Zero, negative or absent disables a rule.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExitsConfig {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub partial_profit_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
}

impl Default for ExitsConfig {
    fn default() -> Self {
        let b = ExitPolicy::bracket();
        Self {
            stop_loss_pct: b.stop_loss_pct,
            take_profit_pct: b.take_profit_pct,
            partial_profit_pct: b.partial_profit_pct,
            trailing_stop_pct: b.trailing_stop_pct,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub benchmark_symbol: String,
    pub bar_lookback: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.massive.com".into(),
            api_key_env: "MASSIVE_API_KEY".into(),
            request_timeout_secs: 10,
            benchmark_symbol: "SPY".into(),
            bar_lookback: 390,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name).with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve the market-data API key, if set.
    pub fn data_api_key(&self) -> Option<SecretString> {
        Self::resolve_env(&self.data.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let e = &self.engine;
        let bad = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if e.max_open_positions == 0 {
            return bad("engine.max_open_positions must be at least 1");
        }
        if !(e.notional_per_trade > 0.0) {
            return bad("engine.notional_per_trade must be positive");
        }
        if !(e.daily_loss_limit > 0.0) {
            return bad("engine.daily_loss_limit must be positive");
        }
        if !(0.0..=1.0).contains(&e.min_score) {
            return bad("engine.min_score must be within [0, 1]");
        }
        if e.session_start_hour_utc >= e.session_end_hour_utc || e.session_end_hour_utc > 24 {
            return bad("engine session hours must satisfy start < end <= 24");
        }
        if e.scan_interval_secs == 0 || e.scan_timeout_secs == 0 {
            return bad("engine scan interval and timeout must be non-zero");
        }
        if !(self.predictor.learning_rate > 0.0 && self.predictor.learning_rate.is_finite()) {
            return bad("predictor.learning_rate must be positive");
        }
        if let Some(secs) = self.predictor.max_pending_age_secs {
            if pending_age(secs).is_none() {
                return bad("predictor.max_pending_age_secs is out of range");
            }
        }
        if self.scanner.min_price > self.scanner.max_price {
            return bad("scanner.min_price exceeds scanner.max_price");
        }
        let sc = &self.scanner;
        for bound in [sc.min_relative_volume, sc.max_market_cap, sc.max_float_shares].into_iter().flatten() {
            if !(bound > 0.0 && bound.is_finite()) {
                return bad("scanner relative-volume, market-cap and float bounds must be positive");
            }
        }
        if self.regime.basket.is_empty() {
            return bad("regime.basket must name at least one symbol");
        }
        Ok(())
    }

    // -- Projections into component configs ----------------------------------

    pub fn decision_config(&self) -> DecisionConfig {
        let e = &self.engine;
        DecisionConfig {
            max_open_positions: e.max_open_positions,
            notional_per_trade: e.notional_per_trade,
            daily_loss_limit: e.daily_loss_limit,
            sizing: e.sizing,
            min_score: e.min_score,
            strategy_tag: e.strategy_tag.clone(),
            scan_timeout: Duration::from_secs(e.scan_timeout_secs),
            require_above_vwap: e.require_above_vwap,
            require_near_high: e.require_near_high,
            benchmark_symbol: self.data.benchmark_symbol.clone(),
            bar_lookback: self.data.bar_lookback,
            regime_lookback: self.regime.lookback,
        }
    }

    pub fn scan_filter(&self) -> ScanFilter {
        let s = &self.scanner;
        ScanFilter {
            min_change_pct: s.min_change_pct,
            min_volume: s.min_volume,
            min_price: s.min_price,
            max_price: s.max_price,
            max_candidates: s.max_candidates.min(MAX_CANDIDATES),
            min_relative_volume: s.min_relative_volume,
            max_market_cap: s.max_market_cap,
            max_float_shares: s.max_float_shares,
        }
    }

    pub fn predictor_config(&self) -> PredictorConfig {
        let p = &self.predictor;
        PredictorConfig {
            learning_rate: p.learning_rate,
            learn: p.learn,
            max_pending: p.max_pending_entries,
            max_pending_age: p.max_pending_age_secs.and_then(pending_age),
        }
    }

    pub fn regime_config(&self) -> RegimeConfig {
        RegimeConfig {
            basket: self.regime.basket.clone(),
            bars_per_day: self.regime.bars_per_day,
            ..RegimeConfig::default()
        }
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        let enabled = |v: Option<f64>| v.filter(|p| p.is_finite() && *p > 0.0);
        ExitPolicy {
            stop_loss_pct: enabled(self.exits.stop_loss_pct),
            take_profit_pct: enabled(self.exits.take_profit_pct),
            partial_profit_pct: enabled(self.exits.partial_profit_pct),
            trailing_stop_pct: enabled(self.exits.trailing_stop_pct),
        }
    }

    /// Whether `hour` (UTC) falls inside the trading window.
    pub fn in_session(&self, hour: u32) -> bool {
        hour >= self.engine.session_start_hour_utc && hour < self.engine.session_end_hour_utc
    }
}

/// `None` beyond what a chrono duration can hold.
fn pending_age(secs: u64) -> Option<ChronoDuration> {
    i64::try_from(secs).ok().and_then(ChronoDuration::try_seconds)
}
