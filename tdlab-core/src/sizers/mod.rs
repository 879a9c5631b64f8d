//! Position Sizers: how many dollars a new entry gets.
//!
//! Sizers are portfolio-aware (they see the current portfolio value) but
//! signal-agnostic: the backtest decides *whether* to enter, the sizer only
//! decides *how much*. Stateful sizers learn from closed trades through
//! [`PositionSizer::update_trade_history`].

pub mod fixed;
pub mod kelly;

pub use fixed::FixedSizer;
pub use kelly::{KellySizer, KellySizerConfig};

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ClosedTrade};

/// Result of one sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    /// Dollar amount to allocate.
    pub dollars: f64,
    /// `dollars` as a fraction of portfolio value.
    pub fraction: f64,
}

impl PositionSize {
    pub const ZERO: PositionSize = PositionSize {
        dollars: 0.0,
        fraction: 0.0,
    };

    /// Size from a portfolio fraction.
    pub fn from_fraction(fraction: f64, portfolio_value: f64) -> Self {
        Self {
            dollars: fraction * portfolio_value,
            fraction,
        }
    }
}

/// Position sizing capability consumed by the backtest loop.
///
/// # Responsibilities
/// - Turn ticker history, market history and portfolio value into a dollar size
/// - Keep whatever trade statistics the strategy needs
///
/// # Non-Responsibilities
/// - Sizers do NOT decide entry/exit (the signal and entry rule do)
/// - Sizers do NOT check available cash (the backtest loop does)
pub trait PositionSizer: Send {
    /// Sizer name for summaries and logging.
    fn name(&self) -> &str;

    /// Size a new entry in `symbol`.
    ///
    /// `history` holds the ticker's bars up to and including the decision date;
    /// `market` holds the benchmark's bars over the same span.
    fn calculate_position_size(
        &mut self,
        symbol: &str,
        history: &[Bar],
        market: &[Bar],
        portfolio_value: f64,
    ) -> PositionSize;

    /// Record a closed trade. Stateless sizers ignore it.
    fn update_trade_history(&mut self, _trade: &ClosedTrade) {}
}

/// Daily close-to-close returns, keyed by the date of the later bar.
pub(crate) fn daily_returns(bars: &[Bar]) -> impl Iterator<Item = (chrono::NaiveDate, f64)> + '_ {
    bars.windows(2).filter_map(|w| {
        let prev = w[0].close;
        (prev != 0.0).then(|| (w[1].date, w[1].close / prev - 1.0))
    })
}
