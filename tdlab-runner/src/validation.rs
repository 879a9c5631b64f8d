//! Signal validation against reference dates.
//!
//! Each expected date is matched to the earliest unused detected signal within
//! `±window_days` calendar days. Every signal matches at most once; unmatched
//! expected dates are misses and unmatched signals are false positives.
//!
//! ```toml
//! [validation]
//! start_date = "2023-01-01"
//! end_date = "2024-11-09"
//! window_days = 2
//!
//! [cases]
//! AAPL = ["2023-03-13", "2023-10-26"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use tdlab_core::data::{download, DataProvider, RetryPolicy};
use tdlab_core::{AnnotatedSeries, DetectorConfig, Direction, SignalFamily, Stage, TdEngine};

use crate::config::ConfigError;

/// Outcome of matching one ticker's signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMatch {
    pub hits: usize,
    pub misses: usize,
    pub false_positives: usize,
    pub missed: Vec<NaiveDate>,
    pub extra: Vec<NaiveDate>,
}

impl SignalMatch {
    /// hits / (hits + misses + false positives); 0 when there is nothing to score.
    pub fn accuracy(&self) -> f64 {
        accuracy(self.hits, self.misses, self.false_positives)
    }
}

fn accuracy(hits: usize, misses: usize, false_positives: usize) -> f64 {
    let attempts = hits + misses + false_positives;
    if attempts == 0 {
        return 0.0;
    }
    hits as f64 / attempts as f64
}

/// Match detected `signals` against `expected` dates.
pub fn match_signals(signals: &[NaiveDate], expected: &[NaiveDate], window_days: i64) -> SignalMatch {
    let mut signals = signals.to_vec();
    signals.sort();
    signals.dedup();

    let mut used = vec![false; signals.len()];
    let mut missed = Vec::new();

    for &want in expected {
        let found = signals
            .iter()
            .enumerate()
            .find(|&(k, &got)| !used[k] && (got - want).num_days().abs() <= window_days)
            .map(|(k, _)| k);
        match found {
            Some(k) => used[k] = true,
            None => missed.push(want),
        }
    }

    let extra: Vec<NaiveDate> = signals
        .iter()
        .zip(&used)
        .filter_map(|(&date, &u)| (!u).then_some(date))
        .collect();

    SignalMatch {
        hits: expected.len() - missed.len(),
        misses: missed.len(),
        false_positives: extra.len(),
        missed,
        extra,
    }
}

/// Reference dates per ticker plus the detection settings to check them with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub validation: ValidationSection,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Ticker → dates the signal is expected on.
    pub cases: BTreeMap<String, Vec<NaiveDate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_family")]
    pub signal: SignalFamily,

    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
}

fn default_window_days() -> i64 {
    2
}

/// Buy Countdown 13s.
fn default_family() -> SignalFamily {
    SignalFamily {
        stage: Stage::Countdown,
        direction: Direction::Buy,
    }
}

fn default_min_bars() -> usize {
    50
}

impl ValidationConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if config.validation.start_date >= config.validation.end_date {
            return Err(ConfigError::DateRange {
                start: config.validation.start_date,
                end: config.validation.end_date,
            });
        }
        config.detector.validate()?;
        Ok(config)
    }
}

/// Per-ticker result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub symbol: String,
    /// False when the ticker had no usable data; every expected date is then a miss.
    pub data_available: bool,
    #[serde(flatten)]
    pub matched: SignalMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub family: SignalFamily,
    pub window_days: i64,
    pub cases: Vec<CaseReport>,
}

impl ValidationSummary {
    pub fn total_hits(&self) -> usize {
        self.cases.iter().map(|c| c.matched.hits).sum()
    }

    pub fn total_misses(&self) -> usize {
        self.cases.iter().map(|c| c.matched.misses).sum()
    }

    pub fn total_false_positives(&self) -> usize {
        self.cases.iter().map(|c| c.matched.false_positives).sum()
    }

    pub fn overall_accuracy(&self) -> f64 {
        accuracy(
            self.total_hits(),
            self.total_misses(),
            self.total_false_positives(),
        )
    }
}

/// Download, analyze and score every case.
pub fn run_validation(
    config: &ValidationConfig,
    provider: &dyn DataProvider,
) -> Result<ValidationSummary, ConfigError> {
    let engine = TdEngine::new(config.detector.clone())?;
    let v = &config.validation;

    let cases = config
        .cases
        .iter()
        .map(|(symbol, expected)| {
            let series = download(provider, symbol, v.start_date, v.end_date, &config.retry)
                .into_series()
                .filter(|s| s.len() >= v.min_bars);

            let Some(series) = series else {
                log::info!("Insufficient data for {symbol}; counting every expected date as missed");
                return CaseReport {
                    symbol: symbol.clone(),
                    data_available: false,
                    matched: match_signals(&[], expected, v.window_days),
                };
            };

            let annotated = AnnotatedSeries::analyze(&engine, series, v.signal);
            let matched = match_signals(&annotated.signal_dates(), expected, v.window_days);
            for date in &matched.missed {
                log::debug!("Missed signal for {symbol} on {date}");
            }
            if matched.false_positives > 0 {
                log::debug!(
                    "{} extra signals for {symbol}: {:?}",
                    matched.false_positives,
                    matched.extra
                );
            }
            CaseReport {
                symbol: symbol.clone(),
                data_available: true,
                matched,
            }
        })
        .collect();

    Ok(ValidationSummary {
        family: v.signal,
        window_days: v.window_days,
        cases,
    })
}
