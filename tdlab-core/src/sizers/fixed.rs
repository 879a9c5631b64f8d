//! Fixed Position Sizer
//!
//! Simplest sizer: every entry gets the same dollar amount.

use serde::{Deserialize, Serialize};

use crate::domain::Bar;
use crate::sizers::{PositionSize, PositionSizer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedSizer {
    amount: f64,
}

impl FixedSizer {
    pub fn new(amount: f64) -> Self {
        Self { amount }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl PositionSizer for FixedSizer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn calculate_position_size(
        &mut self,
        _symbol: &str,
        _history: &[Bar],
        _market: &[Bar],
        portfolio_value: f64,
    ) -> PositionSize {
        let fraction = if portfolio_value > 0.0 {
            self.amount / portfolio_value
        } else {
            0.0
        };
        PositionSize {
            dollars: self.amount,
            fraction,
        }
    }
}
