//! Signal Aggregator: one boolean per bar from a family of TD series.
//!
//! The aggregate is true on every bar where any series of the chosen
//! `(stage, direction)` family carries its target count.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::BarSeries;
use crate::td::{Direction, Stage, TdAnalysis, TdEngine};

/// Which series feed the aggregate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFamily {
    pub stage: Stage,
    pub direction: Direction,
}

impl Default for SignalFamily {
    /// Sell Setup completions.
    fn default() -> Self {
        Self {
            stage: Stage::Setup,
            direction: Direction::Sell,
        }
    }
}

impl fmt::Display for SignalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.stage)
    }
}

/// Per-bar aggregate of `family` over `len` bars.
pub fn aggregate_signal(analysis: &TdAnalysis, family: SignalFamily, len: usize) -> Vec<bool> {
    let mut signal = vec![false; len];
    for bar in analysis.completions(family.stage, family.direction) {
        if let Some(slot) = signal.get_mut(bar) {
            *slot = true;
        }
    }
    signal
}

/// A bar series with its TD analysis and aggregate signal attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedSeries {
    pub series: BarSeries,
    pub analysis: TdAnalysis,
    pub family: SignalFamily,
    pub signal: Vec<bool>,
}

impl AnnotatedSeries {
    pub fn new(series: BarSeries, analysis: TdAnalysis, family: SignalFamily) -> Self {
        let signal = aggregate_signal(&analysis, family, series.len());
        Self {
            series,
            analysis,
            family,
            signal,
        }
    }

    /// Run `engine` over `series` and attach the `family` signal.
    pub fn analyze(engine: &TdEngine, series: BarSeries, family: SignalFamily) -> Self {
        let analysis = engine.analyze(&series);
        Self::new(series, analysis, family)
    }

    pub fn symbol(&self) -> &str {
        self.series.symbol()
    }

    pub fn signal_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.signal
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
    }

    pub fn signal_dates(&self) -> Vec<NaiveDate> {
        self.signal_indices().map(|i| self.series.date(i)).collect()
    }

    /// Dense count columns for every series of `(stage, direction)`, keyed by sequence.
    pub fn columns(&self, stage: Stage, direction: Direction) -> Vec<(u32, Vec<u32>)> {
        let len = self.series.len();
        match stage {
            Stage::Setup => self
                .analysis
                .setups(direction)
                .map(|s| (s.sequence, s.counts.to_column(len)))
                .collect(),
            Stage::Countdown => self
                .analysis
                .countdowns(direction)
                .map(|c| (c.sequence, c.counts.to_column(len)))
                .collect(),
        }
    }
}
