//! Setup Detector: price flips followed by a run of closes beyond the close
//! `lookback` bars earlier.
//!
//! Buy: a bearish flip at `i` (`close[i] > close[i-4]`, then
//! `close[i+1] < close[i-3]`) opens a candidate that counts consecutive bars
//! with `close[bar] < close[bar-4]`. Sell mirrors with the inequalities flipped.
//! Each flip gets one complete forward walk before the outer scan moves on, so
//! candidates never interleave in execution, though their bar ranges may overlap.

use crate::domain::BarSeries;

use super::config::{DetectorConfig, DetectorConfigError};
use super::instance::{CountRun, Direction, SetupInstance};
use super::outcome::{AbandonReason, Abandoned, CandidateOutcome};

pub type SetupOutcome = CandidateOutcome<SetupInstance>;

#[derive(Debug, Clone)]
pub struct SetupDetector {
    config: DetectorConfig,
}

impl Default for SetupDetector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
        }
    }
}

impl SetupDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Finalized Setups for `direction`, in sequence order.
    pub fn detect(&self, series: &BarSeries, direction: Direction) -> Vec<SetupInstance> {
        self.scan(series, direction)
            .into_iter()
            .filter_map(CandidateOutcome::into_finalized)
            .collect()
    }

    /// Every candidate opened for `direction`, finalized or abandoned, in flip order.
    pub fn scan(&self, series: &BarSeries, direction: Direction) -> Vec<SetupOutcome> {
        let lookback = self.config.flip_lookback;
        let mut next_sequence = 1;

        // A flip at `i` reads `i - lookback` and the confirmation bar `i + 1`;
        // the trailing `lookback` bars never host one.
        (lookback..series.len().saturating_sub(lookback))
            .filter(|&i| self.is_price_flip(series, i, direction))
            .map(|i| self.walk(series, i, direction, &mut next_sequence))
            .collect()
    }

    fn is_price_flip(&self, series: &BarSeries, i: usize, direction: Direction) -> bool {
        let lb = self.config.flip_lookback;
        let (now, then) = (series.close(i), series.close(i - lb));
        let (next, next_then) = (series.close(i + 1), series.close(i + 1 - lb));
        match direction {
            Direction::Buy => now > then && next < next_then,
            Direction::Sell => now < then && next > next_then,
        }
    }

    /// Run condition on `bar`; `None` when the look-back bar does not exist.
    fn run_holds(&self, series: &BarSeries, bar: usize, direction: Direction) -> Option<bool> {
        let prior = bar.checked_sub(self.config.flip_lookback)?;
        let (now, then) = (series.close(bar), series.close(prior));
        Some(match direction {
            Direction::Buy => now < then,
            Direction::Sell => now > then,
        })
    }

    fn walk(
        &self,
        series: &BarSeries,
        flip: usize,
        direction: Direction,
        next_sequence: &mut u32,
    ) -> SetupOutcome {
        let mut counts = CountRun::default();
        let mut sequence = None;

        let abandon = |counts: &CountRun, sequence: Option<u32>, reason| {
            CandidateOutcome::Abandoned(Abandoned {
                direction,
                trigger_index: flip,
                sequence,
                reached: counts.count(),
                reason,
            })
        };

        for bar in (flip + self.config.setup_scan_offset.bars())..series.len() {
            match self.run_holds(series, bar, direction) {
                Some(true) => {}
                Some(false) => {
                    return abandon(&counts, sequence, AbandonReason::RunBroken { at: bar })
                }
                None => {
                    return abandon(
                        &counts,
                        sequence,
                        AbandonReason::InsufficientLookback { at: bar },
                    )
                }
            }

            let count = counts.push(bar);
            let seq = *sequence.get_or_insert_with(|| {
                let s = *next_sequence;
                *next_sequence += 1;
                s
            });

            if count == self.config.setup_target {
                let start_index = counts.first_index().unwrap_or(bar);
                return CandidateOutcome::Finalized(SetupInstance {
                    direction,
                    sequence: seq,
                    flip_index: flip,
                    start_index,
                    completion_index: bar,
                    counts,
                });
            }
        }

        abandon(&counts, sequence, AbandonReason::SeriesExhausted)
    }
}
