//! Serializable backtest configuration, loaded from TOML.
//!
//! ```toml
//! [backtest]
//! symbols = ["AAPL", "MSFT"]
//! start_date = "2020-01-01"
//! end_date = "2024-01-01"
//!
//! [signal]
//! stage = "setup"
//! direction = "sell"
//!
//! [sizer]
//! type = "kelly"
//! ```
//!
//! Every section except `[backtest]` is optional and falls back to defaults.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tdlab_core::data::RetryPolicy;
use tdlab_core::sizers::KellySizerConfig;
use tdlab_core::td::DetectorConfigError;
use tdlab_core::{DetectorConfig, FixedSizer, KellySizer, PositionSizer, SignalFamily};

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid detector thresholds: {0}")]
    Detector(#[from] DetectorConfigError),

    #[error("no symbols configured")]
    EmptyUniverse,

    #[error("start_date {start} must be before end_date {end}")]
    DateRange { start: NaiveDate, end: NaiveDate },

    #[error("initial_capital must be positive, got {0}")]
    NonPositiveCapital(f64),

    #[error("min_bars must be >= 1")]
    ZeroMinBars,

    #[error("invalid sizer: {0}")]
    Sizer(String),
}

/// Everything needed to reproduce one portfolio backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,

    #[serde(default)]
    pub detector: DetectorConfig,

    /// Which TD family drives entries (default: Sell Setup completions).
    #[serde(default)]
    pub signal: SignalFamily,

    #[serde(default)]
    pub sizer: SizerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// The `[backtest]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub symbols: Vec<String>,

    /// First day requested from the data provider (inclusive).
    pub start_date: NaiveDate,

    /// Last day requested from the data provider (exclusive).
    pub end_date: NaiveDate,

    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// Calendar days between entry and the earliest exit.
    #[serde(default = "default_holding_days")]
    pub holding_days: u32,

    /// Strictly rising closes required after the signal bar before entering.
    #[serde(default = "default_rising_closes")]
    pub rising_closes: usize,

    /// Tickers with fewer bars are skipped before detection.
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,

    /// Market series handed to sizers; never traded.
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
}

fn default_initial_capital() -> f64 {
    100_000.0
}

fn default_holding_days() -> u32 {
    10
}

fn default_rising_closes() -> usize {
    2
}

fn default_min_bars() -> usize {
    50
}

fn default_benchmark() -> String {
    "^GSPC".to_string()
}

/// Position sizer selection (serializable enum).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SizerConfig {
    /// Same dollar amount for every entry.
    Fixed { amount: f64 },

    /// Half-Kelly with correlation and volatility adjustments.
    Kelly(KellySizerConfig),
}

impl Default for SizerConfig {
    /// $1,000 per entry.
    fn default() -> Self {
        Self::Fixed { amount: 1_000.0 }
    }
}

impl SizerConfig {
    pub fn build(&self) -> Box<dyn PositionSizer> {
        match self {
            Self::Fixed { amount } => Box::new(FixedSizer::new(*amount)),
            Self::Kelly(config) => Box::new(KellySizer::new(config.clone())),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Fixed { amount } if !(*amount > 0.0) => Err(ConfigError::Sizer(format!(
                "fixed amount must be positive, got {amount}"
            ))),
            Self::Kelly(k) if !(k.concentration_limit > 0.0 && k.concentration_limit <= 1.0) => {
                Err(ConfigError::Sizer(format!(
                    "concentration_limit must be within (0, 1], got {}",
                    k.concentration_limit
                )))
            }
            Self::Kelly(k) if k.min_vol_scalar > k.max_vol_scalar => Err(ConfigError::Sizer(
                format!(
                    "min_vol_scalar {} exceeds max_vol_scalar {}",
                    k.min_vol_scalar, k.max_vol_scalar
                ),
            )),
            _ => Ok(()),
        }
    }
}

impl BacktestConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default settings over `symbols` and `[start, end)`.
    pub fn new(symbols: Vec<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            backtest: BacktestSection {
                symbols,
                start_date,
                end_date,
                initial_capital: default_initial_capital(),
                holding_days: default_holding_days(),
                rising_closes: default_rising_closes(),
                min_bars: default_min_bars(),
                benchmark: default_benchmark(),
            },
            detector: DetectorConfig::default(),
            signal: SignalFamily::default(),
            sizer: SizerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bt = &self.backtest;
        if bt.symbols.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        if bt.start_date >= bt.end_date {
            return Err(ConfigError::DateRange {
                start: bt.start_date,
                end: bt.end_date,
            });
        }
        if !(bt.initial_capital > 0.0) {
            return Err(ConfigError::NonPositiveCapital(bt.initial_capital));
        }
        if bt.min_bars == 0 {
            return Err(ConfigError::ZeroMinBars);
        }
        self.detector.validate()?;
        self.sizer.validate()
    }

    /// A fresh sizer for one run.
    pub fn build_sizer(&self) -> Box<dyn PositionSizer> {
        self.sizer.build()
    }

    /// Symbols to trade: configured order, duplicates and the benchmark removed.
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.backtest
            .symbols
            .iter()
            .filter(|s| **s != self.backtest.benchmark)
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    /// Deterministic hash of this configuration.
    ///
    /// Two runs with identical configs share a RunId.
    pub fn run_id(&self) -> RunId {
        // Plain structs with string keys: JSON serialization cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
