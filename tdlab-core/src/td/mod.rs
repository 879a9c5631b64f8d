//! TD Setup / TD Countdown detection.
//!
//! The detectors scan an immutable [`BarSeries`] and produce typed instances:
//! Setups first, then Countdowns anchored to completed Setups. Each candidate
//! either finalizes or is abandoned with a reason; only finalized instances
//! reach a [`TdAnalysis`].

pub mod config;
pub mod countdown;
pub mod instance;
pub mod outcome;
pub mod setup;

pub use config::{DetectorConfig, DetectorConfigError, RangeComparison, ScanOffset};
pub use countdown::{CountdownDetector, CountdownOutcome};
pub use instance::{CountRun, CountdownInstance, Direction, SetupInstance, Stage};
pub use outcome::{AbandonReason, Abandoned, CandidateOutcome};
pub use setup::{SetupDetector, SetupOutcome};

use serde::{Deserialize, Serialize};

use crate::domain::BarSeries;

/// Finalized Setup and Countdown series for one bar series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdAnalysis {
    pub setups: Vec<SetupInstance>,
    pub countdowns: Vec<CountdownInstance>,
}

impl TdAnalysis {
    pub fn setups(&self, direction: Direction) -> impl Iterator<Item = &SetupInstance> + '_ {
        self.setups.iter().filter(move |s| s.direction == direction)
    }

    pub fn countdowns(&self, direction: Direction) -> impl Iterator<Item = &CountdownInstance> + '_ {
        self.countdowns
            .iter()
            .filter(move |c| c.direction == direction)
    }

    /// Bars where a series of `(stage, direction)` reaches its target count, ascending
    /// and deduplicated.
    pub fn completions(&self, stage: Stage, direction: Direction) -> Vec<usize> {
        let mut bars: Vec<usize> = match stage {
            Stage::Setup => self.setups(direction).map(|s| s.completion_index).collect(),
            Stage::Countdown => self
                .countdowns(direction)
                .map(|c| c.completion_index)
                .collect(),
        };
        bars.sort_unstable();
        bars.dedup();
        bars
    }

    /// Count run of series `sequence` of `(stage, direction)`.
    pub fn counts(&self, stage: Stage, direction: Direction, sequence: u32) -> Option<&CountRun> {
        match stage {
            Stage::Setup => self
                .setups(direction)
                .find(|s| s.sequence == sequence)
                .map(|s| &s.counts),
            Stage::Countdown => self
                .countdowns(direction)
                .find(|c| c.sequence == sequence)
                .map(|c| &c.counts),
        }
    }
}

/// Every candidate from one full pass, finalized or not.
#[derive(Debug, Clone, Default)]
pub struct TdReport {
    pub setups: Vec<SetupOutcome>,
    pub countdowns: Vec<CountdownOutcome>,
}

impl TdReport {
    pub fn abandoned(&self) -> impl Iterator<Item = &Abandoned> + '_ {
        self.setups
            .iter()
            .filter_map(CandidateOutcome::abandoned)
            .chain(self.countdowns.iter().filter_map(CandidateOutcome::abandoned))
    }

    pub fn into_analysis(self) -> TdAnalysis {
        TdAnalysis {
            setups: self
                .setups
                .into_iter()
                .filter_map(CandidateOutcome::into_finalized)
                .collect(),
            countdowns: self
                .countdowns
                .into_iter()
                .filter_map(CandidateOutcome::into_finalized)
                .collect(),
        }
    }
}

/// Setup then Countdown detection for both directions.
#[derive(Debug, Clone, Default)]
pub struct TdEngine {
    setup: SetupDetector,
    countdown: CountdownDetector,
}

impl TdEngine {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorConfigError> {
        Ok(Self {
            setup: SetupDetector::new(config.clone())?,
            countdown: CountdownDetector::new(config)?,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        self.setup.config()
    }

    pub fn analyze(&self, series: &BarSeries) -> TdAnalysis {
        self.report(series).into_analysis()
    }

    pub fn report(&self, series: &BarSeries) -> TdReport {
        let mut report = TdReport::default();
        for direction in Direction::ALL {
            let setups = self.setup.scan(series, direction);
            let finalized: Vec<SetupInstance> =
                setups.iter().filter_map(|o| o.finalized().cloned()).collect();
            report
                .countdowns
                .extend(self.countdown.scan(series, &finalized, direction));
            report.setups.extend(setups);
        }

        log::debug!(
            "{}: {} setup and {} countdown candidates, {} abandoned",
            series.symbol(),
            report.setups.len(),
            report.countdowns.len(),
            report.abandoned().count()
        );
        report
    }
}

/// Build a series from close prices for tests: open = close, high = close + 1,
/// low = close - 1, one calendar day apart.
#[cfg(test)]
pub(crate) fn series_from_closes(closes: &[f64]) -> BarSeries {
    use crate::domain::Bar;
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            date: base_date + chrono::Duration::days(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        })
        .collect();
    BarSeries::new("TEST", bars).unwrap()
}
