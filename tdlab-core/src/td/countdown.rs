//! Countdown Detector: a 13-count anchored to one completed Setup.
//!
//! For every completed Setup (walked in completion-bar order, then Setup
//! sequence), the scan starts at the Setup's count-1 bar and runs to the end of
//! the series. Buy counts a bar while the count is below the tail threshold when
//! all four hold:
//!
//! - C1 `close[bar] <= low[bar-2]`
//! - C2 `low[bar] <= low[bar-1]` (or `<`, see [`RangeComparison`])
//! - C3 `close[bar] < close` of the previous counted bar (true before the first)
//! - C4 `close[bar] < close[bar-1]`
//!
//! From the tail threshold on, only `close[bar] <` previous counted close is
//! required. Sell mirrors against `high` with `>`/`>=`, and its tail accepts a
//! higher high *or* a higher close than the previous counted bar.
//!
//! A Countdown that hits its target more than `max_countdown_span` bars after
//! count 1 is discarded.
//!
//! [`RangeComparison`]: super::config::RangeComparison

use crate::domain::BarSeries;

use super::config::{DetectorConfig, DetectorConfigError};
use super::instance::{CountRun, CountdownInstance, Direction, SetupInstance};
use super::outcome::{AbandonReason, Abandoned, CandidateOutcome};

pub type CountdownOutcome = CandidateOutcome<CountdownInstance>;

/// Close and high of the last counted bar.
#[derive(Debug, Clone, Copy)]
struct LastCounted {
    close: f64,
    high: f64,
}

#[derive(Debug, Clone)]
pub struct CountdownDetector {
    config: DetectorConfig,
}

impl Default for CountdownDetector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
        }
    }
}

impl CountdownDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Finalized Countdowns for `direction`, in sequence order.
    pub fn detect(
        &self,
        series: &BarSeries,
        setups: &[SetupInstance],
        direction: Direction,
    ) -> Vec<CountdownInstance> {
        self.scan(series, setups, direction)
            .into_iter()
            .filter_map(CandidateOutcome::into_finalized)
            .collect()
    }

    /// Every candidate triggered by a completed `direction` Setup.
    ///
    /// Setups of the other direction, or that never reached the Setup target,
    /// trigger nothing.
    pub fn scan(
        &self,
        series: &BarSeries,
        setups: &[SetupInstance],
        direction: Direction,
    ) -> Vec<CountdownOutcome> {
        let target = self.config.setup_target;
        let mut triggers: Vec<&SetupInstance> = setups
            .iter()
            .filter(|s| {
                s.direction == direction && s.counts.count_at(s.completion_index) == Some(target)
            })
            .collect();
        triggers.sort_by_key(|s| (s.completion_index, s.sequence));

        let mut next_sequence = 1;
        triggers
            .into_iter()
            .map(|setup| self.open(series, setup, &mut next_sequence))
            .collect()
    }

    fn open(
        &self,
        series: &BarSeries,
        setup: &SetupInstance,
        next_sequence: &mut u32,
    ) -> CountdownOutcome {
        let anchor = setup
            .completion_index
            .checked_sub(self.config.setup_anchor_distance())
            .filter(|&a| setup.counts.count_at(a) == Some(1));

        match anchor {
            Some(anchor) => self.walk(series, setup, anchor, next_sequence),
            None => CandidateOutcome::Abandoned(Abandoned {
                direction: setup.direction,
                trigger_index: setup.completion_index,
                sequence: None,
                reached: 0,
                reason: AbandonReason::InvalidAnchor,
            }),
        }
    }

    fn walk(
        &self,
        series: &BarSeries,
        setup: &SetupInstance,
        anchor: usize,
        next_sequence: &mut u32,
    ) -> CountdownOutcome {
        let direction = setup.direction;
        let mut counts = CountRun::default();
        let mut sequence = None;
        let mut start = None;
        let mut last: Option<LastCounted> = None;

        for bar in anchor..series.len() {
            let qualifies = if counts.count() < self.config.countdown_tail_from {
                self.full_conditions(series, bar, direction, last)
            } else {
                self.tail_condition(series, bar, direction, last)
            };
            if !qualifies {
                continue;
            }

            let count = counts.push(bar);
            last = Some(LastCounted {
                close: series.close(bar),
                high: series.high(bar),
            });
            let seq = *sequence.get_or_insert_with(|| {
                let s = *next_sequence;
                *next_sequence += 1;
                s
            });
            let start_index = *start.get_or_insert(bar);

            if count == self.config.countdown_target {
                let span = bar - start_index;
                if span > self.config.max_countdown_span {
                    return CandidateOutcome::Abandoned(Abandoned {
                        direction,
                        trigger_index: setup.completion_index,
                        sequence: Some(seq),
                        reached: count,
                        reason: AbandonReason::WindowExceeded { span },
                    });
                }
                return CandidateOutcome::Finalized(CountdownInstance {
                    direction,
                    sequence: seq,
                    setup_sequence: setup.sequence,
                    anchor_index: anchor,
                    start_index,
                    completion_index: bar,
                    counts,
                });
            }
        }

        CandidateOutcome::Abandoned(Abandoned {
            direction,
            trigger_index: setup.completion_index,
            sequence,
            reached: counts.count(),
            reason: AbandonReason::SeriesExhausted,
        })
    }

    /// C1–C4, used below the tail threshold.
    fn full_conditions(
        &self,
        series: &BarSeries,
        bar: usize,
        direction: Direction,
        last: Option<LastCounted>,
    ) -> bool {
        let (Some(prev), Some(prev2)) = (bar.checked_sub(1), bar.checked_sub(2)) else {
            return false;
        };
        let close = series.close(bar);
        let cmp = self.config.countdown_range_comparison;

        match direction {
            Direction::Buy => {
                close <= series.low(prev2)
                    && cmp.at_or_below(series.low(bar), series.low(prev))
                    && last.map_or(true, |l| close < l.close)
                    && close < series.close(prev)
            }
            Direction::Sell => {
                close >= series.high(prev2)
                    && cmp.at_or_above(series.high(bar), series.high(prev))
                    && last.map_or(true, |l| close > l.close)
                    && close > series.close(prev)
            }
        }
    }

    /// Relaxed condition from the tail threshold to the target.
    fn tail_condition(
        &self,
        series: &BarSeries,
        bar: usize,
        direction: Direction,
        last: Option<LastCounted>,
    ) -> bool {
        let Some(l) = last else {
            return false;
        };
        if bar < 1 {
            return false;
        }
        let close = series.close(bar);
        match direction {
            Direction::Buy => close < l.close,
            Direction::Sell => series.high(bar) > l.high || close > l.close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_setup(direction: Direction, bars: &[usize]) -> SetupInstance {
        let mut counts = CountRun::default();
        for &b in bars {
            counts.push(b);
        }
        SetupInstance {
            direction,
            sequence: 1,
            flip_index: bars[0].saturating_sub(1),
            start_index: bars[0],
            completion_index: *bars.last().unwrap(),
            counts,
        }
    }

    #[test]
    fn gapped_setup_has_invalid_anchor() {
        // Nine counts over ten bars: the bar eight before the 9 carries count 2.
        let series = crate::td::series_from_closes(&[10.0; 20]);
        let setup = fake_setup(Direction::Buy, &[4, 5, 6, 7, 8, 9, 10, 11, 13]);
        let outcomes = CountdownDetector::default().scan(&series, &[setup], Direction::Buy);

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].reason(), Some(AbandonReason::InvalidAnchor));
    }

    #[test]
    fn incomplete_or_opposite_setups_trigger_nothing() {
        let series = crate::td::series_from_closes(&[10.0; 20]);
        let short = fake_setup(Direction::Buy, &[4, 5, 6, 7]);
        let sell = fake_setup(Direction::Sell, &[4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let outcomes = CountdownDetector::default().scan(&series, &[short, sell], Direction::Buy);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn flat_series_never_counts() {
        let series = crate::td::series_from_closes(&[10.0; 30]);
        let setup = fake_setup(Direction::Buy, &[4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let outcomes = CountdownDetector::default().scan(&series, &[setup], Direction::Buy);

        let a = outcomes[0].abandoned().unwrap();
        assert_eq!(a.reached, 0);
        assert_eq!(a.sequence, None);
        assert_eq!(a.reason, AbandonReason::SeriesExhausted);
    }
}
