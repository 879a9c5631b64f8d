//! Finalized Setup and Countdown instances.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which exhaustion a sequence is counting toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Closes below the close `lookback` bars earlier (downtrend exhaustion).
    Buy,
    /// Closes above the close `lookback` bars earlier (uptrend exhaustion).
    Sell,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Buy, Direction::Sell];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

/// Setup (9-count) or Countdown (13-count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Countdown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => f.write_str("setup"),
            Self::Countdown => f.write_str("countdown"),
        }
    }
}

/// Sparse bar-index → count mapping for one instance.
///
/// Counts are always `1, 2, 3, ...` on strictly increasing bar indices, so the
/// run is stored as the list of bars: `bars[k]` carries count `k + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRun {
    bars: Vec<usize>,
}

impl CountRun {
    /// Record the next count on `bar` and return it.
    pub(crate) fn push(&mut self, bar: usize) -> u32 {
        debug_assert!(self.bars.last().map_or(true, |&last| bar > last));
        self.bars.push(bar);
        self.bars.len() as u32
    }

    /// Highest count reached so far.
    pub fn count(&self) -> u32 {
        self.bars.len() as u32
    }

    pub fn count_at(&self, index: usize) -> Option<u32> {
        self.bars
            .binary_search(&index)
            .ok()
            .map(|pos| pos as u32 + 1)
    }

    /// Bar that carries `count`, if the run got that far.
    pub fn index_of_count(&self, count: u32) -> Option<usize> {
        let pos = (count as usize).checked_sub(1)?;
        self.bars.get(pos).copied()
    }

    pub fn first_index(&self) -> Option<usize> {
        self.bars.first().copied()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.bars.last().copied()
    }

    /// `(bar_index, count)` pairs in bar order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.bars
            .iter()
            .enumerate()
            .map(|(pos, &bar)| (bar, pos as u32 + 1))
    }

    /// Dense per-bar column of length `len`: the count on bars in the run, 0 elsewhere.
    pub fn to_column(&self, len: usize) -> Vec<u32> {
        let mut column = vec![0; len];
        for (bar, count) in self.iter() {
            if let Some(slot) = column.get_mut(bar) {
                *slot = count;
            }
        }
        column
    }
}

/// A Setup that reached its target count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupInstance {
    pub direction: Direction,
    /// Series identity, `1, 2, 3, ...` per direction in creation order.
    pub sequence: u32,
    /// Bar `i` where the price flip was detected.
    pub flip_index: usize,
    /// Bar carrying count 1.
    pub start_index: usize,
    /// Bar carrying the target count.
    pub completion_index: usize,
    pub counts: CountRun,
}

/// A Countdown that reached its target count inside the completion window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownInstance {
    pub direction: Direction,
    /// Series identity, `1, 2, 3, ...` per direction in creation order.
    pub sequence: u32,
    /// Sequence of the Setup whose completion triggered this Countdown.
    pub setup_sequence: u32,
    /// First bar scanned: the triggering Setup's count-1 bar.
    pub anchor_index: usize,
    /// Bar carrying count 1.
    pub start_index: usize,
    /// Bar carrying the target count.
    pub completion_index: usize,
    pub counts: CountRun,
}

impl CountdownInstance {
    /// Bars elapsed between count 1 and the final count.
    pub fn span(&self) -> usize {
        self.completion_index - self.start_index
    }
}
