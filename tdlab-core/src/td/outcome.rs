//! Tagged result for every candidate a detector opens.

use serde::{Deserialize, Serialize};

use super::instance::Direction;

/// Why a candidate was dropped without being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbandonReason {
    /// The run condition failed on bar `at` before the target count.
    RunBroken { at: usize },
    /// Bar `at` lacks the look-back the run condition needs.
    InsufficientLookback { at: usize },
    /// The series ended before the target count.
    SeriesExhausted,
    /// The triggering Setup does not carry count 1 where its run must start.
    InvalidAnchor,
    /// Target reached, but `span` bars after count 1 (more than the window allows).
    WindowExceeded { span: usize },
}

/// A candidate that existed transiently and is never exposed as a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abandoned {
    pub direction: Direction,
    /// Flip bar for Setups, triggering Setup's final bar for Countdowns.
    pub trigger_index: usize,
    /// Sequence number consumed, if the candidate reached count 1.
    pub sequence: Option<u32>,
    /// Highest count reached.
    pub reached: u32,
    pub reason: AbandonReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateOutcome<T> {
    Finalized(T),
    Abandoned(Abandoned),
}

impl<T> CandidateOutcome<T> {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }

    pub fn finalized(&self) -> Option<&T> {
        match self {
            Self::Finalized(instance) => Some(instance),
            Self::Abandoned(_) => None,
        }
    }

    pub fn into_finalized(self) -> Option<T> {
        match self {
            Self::Finalized(instance) => Some(instance),
            Self::Abandoned(_) => None,
        }
    }

    pub fn abandoned(&self) -> Option<&Abandoned> {
        match self {
            Self::Finalized(_) => None,
            Self::Abandoned(a) => Some(a),
        }
    }

    pub fn reason(&self) -> Option<AbandonReason> {
        self.abandoned().map(|a| a.reason)
    }
}
