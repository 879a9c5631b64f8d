//! ClosedTrade: a completed long round trip, fed back into position sizers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,

    // ── Entry ──
    pub entry_date: NaiveDate,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_date: NaiveDate,
    pub exit_price: f64,

    // ── Size ──
    pub shares: f64,
}

impl ClosedTrade {
    pub fn initial_value(&self) -> f64 {
        self.shares * self.entry_price
    }

    pub fn final_value(&self) -> f64 {
        self.shares * self.exit_price
    }

    pub fn pnl(&self) -> f64 {
        self.final_value() - self.initial_value()
    }

    /// Price return of the trade as a fraction of the entry price.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) / self.entry_price
    }

    pub fn is_winner(&self) -> bool {
        self.return_pct() > 0.0
    }

    pub fn is_loser(&self) -> bool {
        self.return_pct() < 0.0
    }
}
