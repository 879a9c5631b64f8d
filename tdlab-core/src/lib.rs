//! TDLab Core: TD Setup / TD Countdown detection and its collaborators.
//!
//! This crate contains:
//! - Domain types (bars, bar series, closed trades)
//! - Setup and Countdown detectors with tagged candidate outcomes
//! - The signal aggregator and annotated series
//! - Position sizers (fixed, Kelly)
//! - Market data providers and the bounded-retry download

pub mod data;
pub mod domain;
pub mod signal;
pub mod sizers;
pub mod td;

pub use domain::{Bar, BarSeries, ClosedTrade, SeriesError};
pub use signal::{aggregate_signal, AnnotatedSeries, SignalFamily};
pub use sizers::{FixedSizer, KellySizer, PositionSize, PositionSizer};
pub use td::{
    CountdownInstance, DetectorConfig, Direction, SetupInstance, Stage, TdAnalysis, TdEngine,
};
