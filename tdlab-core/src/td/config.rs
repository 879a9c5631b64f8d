//! Detector thresholds.
//!
//! Every threshold the Setup/Countdown detectors use lives here and is passed in
//! at construction. Defaults are the classic values: 4-bar flip lookback,
//! Setup target 9, Countdown target 13 with the relaxed tail from count 10, and a
//! 50-bar Countdown completion window.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the forward Setup walk starts relative to the price-flip bar `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOffset {
    /// Start at `i + 1`, the flip confirmation bar.
    #[default]
    AfterFlip,
    /// Start at `i + 2`, the bar after the confirmation bar.
    AfterConfirmation,
}

impl ScanOffset {
    pub fn bars(self) -> usize {
        match self {
            Self::AfterFlip => 1,
            Self::AfterConfirmation => 2,
        }
    }
}

/// Boundary used by Countdown condition C2 (`low` vs prior `low` for Buy,
/// `high` vs prior `high` for Sell).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeComparison {
    /// `<=` for Buy, `>=` for Sell.
    #[default]
    Inclusive,
    /// `<` for Buy, `>` for Sell.
    Strict,
}

impl RangeComparison {
    pub fn at_or_below(self, value: f64, reference: f64) -> bool {
        match self {
            Self::Inclusive => value <= reference,
            Self::Strict => value < reference,
        }
    }

    pub fn at_or_above(self, value: f64, reference: f64) -> bool {
        match self {
            Self::Inclusive => value >= reference,
            Self::Strict => value > reference,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectorConfigError {
    #[error("flip_lookback must be >= 1")]
    ZeroLookback,
    #[error("setup_target must be >= 1")]
    ZeroSetupTarget,
    #[error("countdown_target must be >= 1")]
    ZeroCountdownTarget,
    #[error("countdown_tail_from ({tail_from}) must be within 1..={target}")]
    TailOutOfRange { tail_from: u32, target: u32 },
}

/// Thresholds shared by the Setup and Countdown detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bars between a close and the close it is compared against (4).
    pub flip_lookback: usize,
    /// Count at which a Setup completes (9).
    pub setup_target: u32,
    /// Count at which a Countdown completes (13).
    pub countdown_target: u32,
    /// First count handled by the relaxed tail conditions (10).
    pub countdown_tail_from: u32,
    /// Maximum bars between Countdown count 1 and its final count (50).
    pub max_countdown_span: usize,
    pub setup_scan_offset: ScanOffset,
    pub countdown_range_comparison: RangeComparison,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            flip_lookback: 4,
            setup_target: 9,
            countdown_target: 13,
            countdown_tail_from: 10,
            max_countdown_span: 50,
            setup_scan_offset: ScanOffset::AfterFlip,
            countdown_range_comparison: RangeComparison::Inclusive,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), DetectorConfigError> {
        if self.flip_lookback == 0 {
            return Err(DetectorConfigError::ZeroLookback);
        }
        if self.setup_target == 0 {
            return Err(DetectorConfigError::ZeroSetupTarget);
        }
        if self.countdown_target == 0 {
            return Err(DetectorConfigError::ZeroCountdownTarget);
        }
        if self.countdown_tail_from == 0 || self.countdown_tail_from > self.countdown_target {
            return Err(DetectorConfigError::TailOutOfRange {
                tail_from: self.countdown_tail_from,
                target: self.countdown_target,
            });
        }
        Ok(())
    }

    /// Bars between a Setup's count-1 bar and its final bar (8 by default).
    pub fn setup_anchor_distance(&self) -> usize {
        self.setup_target as usize - 1
    }
}
