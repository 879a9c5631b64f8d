//! Domain types

pub mod bar;
pub mod trade;

pub use bar::{Bar, BarSeries, SeriesError};
pub use trade::ClosedTrade;

/// Symbol type alias
pub type Symbol = String;
