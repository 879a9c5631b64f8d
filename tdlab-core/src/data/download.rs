//! Bounded-retry download and the multi-symbol orchestrator on top of it.
//!
//! `download` makes up to `max_attempts` fetches with a fixed delay between
//! them. Failed attempts are logged as warnings; exhaustion is logged as an
//! error and returned as [`DownloadOutcome::Unavailable`], never as an `Err`.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::provider::{DataProvider, DataSource, DownloadProgress};
use crate::domain::BarSeries;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Available {
        series: BarSeries,
        source: DataSource,
        attempts: u32,
    },
    Unavailable {
        symbol: String,
        attempts: u32,
        last_error: String,
    },
}

impl DownloadOutcome {
    pub fn series(&self) -> Option<&BarSeries> {
        match self {
            Self::Available { series, .. } => Some(series),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn into_series(self) -> Option<BarSeries> {
        match self {
            Self::Available { series, .. } => Some(series),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Fetch `symbol` over `[start, end)`, retrying per `policy`.
pub fn download(
    provider: &dyn DataProvider,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    policy: &RetryPolicy,
) -> DownloadOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match provider.fetch(symbol, start, end) {
            Ok(fetched) => {
                return DownloadOutcome::Available {
                    series: fetched.series,
                    source: fetched.source,
                    attempts: attempt,
                }
            }
            Err(e) => last_error = e.to_string(),
        }

        if attempt == max_attempts {
            log::error!(
                "Failed to download {symbol} after {max_attempts} attempts: {last_error}"
            );
        } else {
            log::warn!("Attempt {attempt} failed for {symbol}: {last_error}");
            if !policy.delay.is_zero() {
                std::thread::sleep(policy.delay);
            }
        }
    }

    DownloadOutcome::Unavailable {
        symbol: symbol.to_string(),
        attempts: max_attempts,
        last_error,
    }
}

/// Download several symbols in order, reporting progress.
pub fn download_symbols(
    provider: &dyn DataProvider,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    policy: &RetryPolicy,
    progress: &dyn DownloadProgress,
) -> DownloadSummary {
    let total = symbols.len();
    let mut outcomes = Vec::with_capacity(total);

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);
        let outcome = download(provider, symbol, start, end, policy);
        progress.on_complete(symbol, i, total, outcome.series().map(BarSeries::len));
        outcomes.push(outcome);
    }

    let summary = DownloadSummary { outcomes };
    progress.on_batch_complete(summary.succeeded(), summary.failed(), total);
    summary
}

/// Outcomes of a batch download, in request order.
#[derive(Debug)]
pub struct DownloadSummary {
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_available()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}
