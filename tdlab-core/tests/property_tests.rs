//! Property tests for detector invariants.
//!
//! Uses proptest to verify, over random walks with frequent ties:
//! 1. Setup counts run 1..=9 on consecutive bars starting right after the flip
//! 2. Countdowns are anchored to a completed Setup's count-1 bar
//! 3. No retained Countdown spans more than the completion window
//! 4. Detection is idempotent
//! 5. Flips never open within the first or last four bars

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use tdlab_core::domain::{Bar, BarSeries};
use tdlab_core::td::{
    CandidateOutcome, CountRun, DetectorConfig, Direction, SetupDetector, TdEngine,
};

// ── Strategies (proptest) ────────────────────────────────────────────

/// Random walk with integer steps so equal closes are common.
fn arb_series() -> impl Strategy<Value = BarSeries> {
    prop::collection::vec((-3i32..=3, 0u8..3, 0u8..3), 0..260).prop_map(|steps| {
        let base = NaiveDate::from_ymd_opt(2010, 1, 4).unwrap();
        let mut close = 500.0;
        let bars = steps
            .into_iter()
            .enumerate()
            .map(|(i, (step, up, down))| {
                close += step as f64;
                Bar {
                    date: base + Duration::days(i as i64),
                    open: close,
                    high: close + up as f64,
                    low: close - down as f64,
                    close,
                }
            })
            .collect();
        BarSeries::new("PROP", bars).unwrap()
    })
}

/// Strongly trending walks, which complete Countdowns far more often.
fn arb_trending_series() -> impl Strategy<Value = BarSeries> {
    (prop::bool::ANY, prop::collection::vec((0i32..=4, 0u8..2), 40..200)).prop_map(
        |(falling, steps)| {
            let base = NaiveDate::from_ymd_opt(2010, 1, 4).unwrap();
            let sign = if falling { -1.0 } else { 1.0 };
            let mut close = 1_000.0;
            let bars = steps
                .into_iter()
                .enumerate()
                .map(|(i, (step, wick))| {
                    // Mostly with the trend, occasionally against it.
                    let delta = if step == 0 { -2.0 } else { step as f64 };
                    close += sign * delta;
                    Bar {
                        date: base + Duration::days(i as i64),
                        open: close,
                        high: close + wick as f64,
                        low: close - wick as f64,
                        close,
                    }
                })
                .collect();
            BarSeries::new("TREND", bars).unwrap()
        },
    )
}

fn assert_consecutive_counts(counts: &CountRun, target: u32) -> Result<(), TestCaseError> {
    let pairs: Vec<_> = counts.iter().collect();
    prop_assert_eq!(pairs.len() as u32, target);
    for (k, &(_, count)) in pairs.iter().enumerate() {
        prop_assert_eq!(count, k as u32 + 1);
    }
    for w in pairs.windows(2) {
        prop_assert!(w[1].0 > w[0].0);
    }
    Ok(())
}

// ── 1. Setup count shape ─────────────────────────────────────────────

proptest! {
    #[test]
    fn setup_counts_are_consecutive(series in arb_series()) {
        let detector = SetupDetector::default();
        for direction in Direction::ALL {
            for s in detector.detect(&series, direction) {
                assert_consecutive_counts(&s.counts, 9)?;
                prop_assert_eq!(s.start_index, s.flip_index + 1);
                prop_assert_eq!(s.completion_index, s.start_index + 8);
                prop_assert_eq!(s.counts.first_index(), Some(s.start_index));
                prop_assert_eq!(s.counts.last_index(), Some(s.completion_index));
            }
        }
    }

    #[test]
    fn abandoned_setups_never_reach_target(series in arb_series()) {
        let detector = SetupDetector::default();
        for direction in Direction::ALL {
            for outcome in detector.scan(&series, direction) {
                if let CandidateOutcome::Abandoned(a) = outcome {
                    prop_assert!(a.reached < 9);
                    prop_assert_eq!(a.sequence.is_some(), a.reached > 0);
                }
            }
        }
    }

    #[test]
    fn sequences_increase_in_creation_order(series in arb_series()) {
        let analysis = TdEngine::default().analyze(&series);
        for direction in Direction::ALL {
            let seqs: Vec<u32> = analysis.setups(direction).map(|s| s.sequence).collect();
            prop_assert!(seqs.windows(2).all(|w| w[1] > w[0]));
            let seqs: Vec<u32> = analysis.countdowns(direction).map(|c| c.sequence).collect();
            prop_assert!(seqs.windows(2).all(|w| w[1] > w[0]));
        }
    }
}

// ── 2 & 3. Countdown anchoring and window ────────────────────────────

proptest! {
    #[test]
    fn countdowns_are_anchored_and_bounded(series in arb_trending_series()) {
        let analysis = TdEngine::default().analyze(&series);
        for cd in &analysis.countdowns {
            let setup = analysis
                .setups(cd.direction)
                .find(|s| s.sequence == cd.setup_sequence);
            prop_assert!(setup.is_some());
            let setup = setup.unwrap();

            prop_assert_eq!(setup.counts.count_at(setup.completion_index), Some(9));
            prop_assert_eq!(cd.anchor_index, setup.completion_index - 8);
            prop_assert_eq!(setup.counts.count_at(cd.anchor_index), Some(1));
            prop_assert!(cd.start_index >= cd.anchor_index);

            assert_consecutive_counts(&cd.counts, 13)?;
            prop_assert!(cd.completion_index - cd.start_index <= 50);
        }
    }

    #[test]
    fn narrower_window_never_adds_countdowns(series in arb_trending_series()) {
        let wide = TdEngine::default().analyze(&series);
        let narrow = TdEngine::new(DetectorConfig {
            max_countdown_span: 20,
            ..Default::default()
        })
        .unwrap()
        .analyze(&series);

        prop_assert!(narrow.countdowns.len() <= wide.countdowns.len());
        prop_assert!(narrow.countdowns.iter().all(|c| c.span() <= 20));
    }
}

// ── 4. Idempotence ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn detection_is_idempotent(series in arb_series()) {
        let engine = TdEngine::default();
        prop_assert_eq!(engine.analyze(&series), engine.analyze(&series));
    }
}

// ── 5. Boundary flips ────────────────────────────────────────────────

proptest! {
    #[test]
    fn flips_respect_lookback_and_lookahead(series in arb_series()) {
        let n = series.len();
        let detector = SetupDetector::default();
        for direction in Direction::ALL {
            for outcome in detector.scan(&series, direction) {
                let flip = match &outcome {
                    CandidateOutcome::Finalized(s) => s.flip_index,
                    CandidateOutcome::Abandoned(a) => a.trigger_index,
                };
                prop_assert!(flip >= 4);
                prop_assert!(flip + 4 < n);
            }
        }
    }
}
