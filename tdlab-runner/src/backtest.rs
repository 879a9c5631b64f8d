//! Portfolio backtest loop over analyzed tickers.
//!
//! Entry rule: on a signal bar `i`, the next `rising_closes + 1` closes must
//! rise strictly (bars `i+1 ..= i+rising_closes+1`); the position opens at the
//! open of the following bar and becomes eligible to close `holding_days`
//! calendar days later, at the close of the first bar the ticker trades on or
//! after that date.
//!
//! Each day, in order:
//! 1. Close due positions and feed each closed trade back to the sizer
//! 2. Open today's entries, sized against yesterday's portfolio value;
//!    an entry larger than available cash is skipped
//! 3. Mark the portfolio to market
//!
//! The loop is pure: no I/O, no clock, no randomness.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use tdlab_core::{AnnotatedSeries, Bar, ClosedTrade, PositionSizer};

use crate::config::BacktestSection;

/// Knobs of the entry/exit rule and the starting cash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioParams {
    pub initial_capital: f64,
    pub holding_days: u32,
    pub rising_closes: usize,
}

impl Default for PortfolioParams {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            holding_days: 10,
            rising_closes: 2,
        }
    }
}

impl From<&BacktestSection> for PortfolioParams {
    fn from(bt: &BacktestSection) -> Self {
        Self {
            initial_capital: bt.initial_capital,
            holding_days: bt.holding_days,
            rising_closes: bt.rising_closes,
        }
    }
}

/// How signals turned (or failed to turn) into trades.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub total_signals: usize,
    pub signals_with_rising_closes: usize,
    pub trades_executed: usize,
    pub insufficient_cash: usize,
    /// Entries the sizer gave no money to.
    pub zero_size: usize,
    pub max_concurrent_positions: usize,
}

/// One day of the portfolio value series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub cash: f64,
    pub n_positions: usize,
}

/// A still-open position at the end of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub shares: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRun {
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<ClosedTrade>,
    pub open_positions: Vec<OpenPosition>,
    pub diagnostics: Diagnostics,
}

impl PortfolioRun {
    pub fn final_value(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.portfolio_value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.portfolio_value).collect()
    }
}

/// An entry that passed the rising-closes filter.
#[derive(Debug, Clone, PartialEq)]
struct PendingEntry {
    ticker: usize,
    entry_date: NaiveDate,
    entry_price: f64,
    exit_date: NaiveDate,
}

struct Position {
    ticker: usize,
    entry_date: NaiveDate,
    entry_price: f64,
    exit_date: NaiveDate,
    shares: f64,
}

/// Run the portfolio over every date any ticker (or the market) trades.
pub fn run_portfolio(
    universe: &[AnnotatedSeries],
    market: &[Bar],
    params: &PortfolioParams,
    sizer: &mut dyn PositionSizer,
) -> PortfolioRun {
    let mut diagnostics = Diagnostics::default();
    let pending = collect_entries(universe, params, &mut diagnostics);

    let mut dates: BTreeSet<NaiveDate> = universe
        .iter()
        .flat_map(|a| a.series.bars().iter().map(|b| b.date))
        .collect();
    dates.extend(market.iter().map(|b| b.date));

    let mut cash = params.initial_capital;
    let mut portfolio_value = params.initial_capital;
    let mut active: Vec<Position> = Vec::new();
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(dates.len());
    let mut next = 0;

    for date in dates {
        // 1. Exits
        let mut still_open = Vec::with_capacity(active.len());
        for pos in active.drain(..) {
            let series = &universe[pos.ticker].series;
            let exit_bar = (date >= pos.exit_date)
                .then(|| series.index_of(date))
                .flatten()
                .map(|i| series.bars()[i]);
            match exit_bar {
                Some(bar) => {
                    cash += pos.shares * bar.close;
                    let trade = ClosedTrade {
                        symbol: series.symbol().to_string(),
                        entry_date: pos.entry_date,
                        entry_price: pos.entry_price,
                        exit_date: date,
                        exit_price: bar.close,
                        shares: pos.shares,
                    };
                    sizer.update_trade_history(&trade);
                    trades.push(trade);
                }
                None => still_open.push(pos),
            }
        }
        active = still_open;

        // 2. Entries
        while next < pending.len() && pending[next].entry_date == date {
            let entry = &pending[next];
            next += 1;

            let series = &universe[entry.ticker].series;
            let history = series.history_until(date);
            let market_history = &market[..market.partition_point(|b| b.date <= date)];
            let size = sizer.calculate_position_size(
                series.symbol(),
                history,
                market_history,
                portfolio_value,
            );

            if !(size.dollars > 0.0) || !(entry.entry_price > 0.0) {
                log::debug!(
                    "{}: no allocation on {date} (size {:.2})",
                    series.symbol(),
                    size.dollars
                );
                diagnostics.zero_size += 1;
            } else if size.dollars <= cash {
                active.push(Position {
                    ticker: entry.ticker,
                    entry_date: entry.entry_date,
                    entry_price: entry.entry_price,
                    exit_date: entry.exit_date,
                    shares: size.dollars / entry.entry_price,
                });
                cash -= size.dollars;
                diagnostics.trades_executed += 1;
            } else {
                diagnostics.insufficient_cash += 1;
            }
        }

        // 3. Mark to market
        portfolio_value = cash
            + active
                .iter()
                .map(|pos| {
                    let price = universe[pos.ticker]
                        .series
                        .last_on_or_before(date)
                        .map_or(pos.entry_price, |b| b.close);
                    pos.shares * price
                })
                .sum::<f64>();

        diagnostics.max_concurrent_positions = diagnostics.max_concurrent_positions.max(active.len());
        equity_curve.push(EquityPoint {
            date,
            portfolio_value,
            cash,
            n_positions: active.len(),
        });
    }

    let open_positions = active
        .into_iter()
        .map(|pos| OpenPosition {
            symbol: universe[pos.ticker].symbol().to_string(),
            entry_date: pos.entry_date,
            entry_price: pos.entry_price,
            exit_date: pos.exit_date,
            shares: pos.shares,
        })
        .collect();

    log::info!(
        "Backtest: {} signals, {} with rising closes, {} trades, {} insufficient cash",
        diagnostics.total_signals,
        diagnostics.signals_with_rising_closes,
        diagnostics.trades_executed,
        diagnostics.insufficient_cash
    );

    PortfolioRun {
        equity_curve,
        trades,
        open_positions,
        diagnostics,
    }
}

/// Every signal that passes the rising-closes filter, sorted by entry date.
fn collect_entries(
    universe: &[AnnotatedSeries],
    params: &PortfolioParams,
    diagnostics: &mut Diagnostics,
) -> Vec<PendingEntry> {
    let mut pending = Vec::new();
    let confirm = params.rising_closes + 1;

    for (ticker, annotated) in universe.iter().enumerate() {
        let bars = annotated.series.bars();
        for i in annotated.signal_indices() {
            diagnostics.total_signals += 1;

            let Some(window) = bars.get(i + 1..=i + confirm) else {
                continue;
            };
            if !window.windows(2).all(|w| w[1].close > w[0].close) {
                continue;
            }
            diagnostics.signals_with_rising_closes += 1;

            let Some(entry) = bars.get(i + confirm + 1) else {
                continue;
            };
            pending.push(PendingEntry {
                ticker,
                entry_date: entry.date,
                entry_price: entry.open,
                exit_date: entry.date + Duration::days(i64::from(params.holding_days)),
            });
        }
    }

    // Stable: same-day entries keep universe order.
    pending.sort_by_key(|e| e.entry_date);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdlab_core::{BarSeries, FixedSizer, PositionSize, SignalFamily, TdAnalysis};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(day: u32, open: f64, close: f64) -> Bar {
        Bar {
            date: d(day),
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
        }
    }

    /// Daily bars on Jan 1..=n with the given closes, open = close - 1.
    fn annotated(symbol: &str, closes: &[f64], signals: &[usize]) -> AnnotatedSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as u32 + 1, c - 1.0, c))
            .collect();
        let series = BarSeries::new(symbol, bars).unwrap();
        let mut signal = vec![false; closes.len()];
        for &i in signals {
            signal[i] = true;
        }
        AnnotatedSeries {
            series,
            analysis: TdAnalysis::default(),
            family: SignalFamily::default(),
            signal,
        }
    }

    /// Signal on bar 0, rising closes on 1..=3, entry at the open of bar 4.
    const RISING: [f64; 20] = [
        10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 19.0, 20.0, 21.0, 22.0, 23.0, 24.0,
        25.0, 26.0, 27.0, 28.0, 29.0,
    ];

    #[test]
    fn entry_on_fourth_bar_and_exit_after_holding_period() {
        let universe = [annotated("AAA", &RISING, &[0])];
        let mut sizer = FixedSizer::new(1_300.0);
        let run = run_portfolio(&universe, &[], &PortfolioParams::default(), &mut sizer);

        assert_eq!(run.diagnostics.total_signals, 1);
        assert_eq!(run.diagnostics.signals_with_rising_closes, 1);
        assert_eq!(run.diagnostics.trades_executed, 1);
        assert_eq!(run.trades.len(), 1);

        let t = &run.trades[0];
        // Bar 4 is Jan 5, open 13; exit due Jan 15 = bar 14, close 24.
        assert_eq!(t.entry_date, d(5));
        assert_eq!(t.entry_price, 13.0);
        assert_eq!(t.exit_date, d(15));
        assert_eq!(t.exit_price, 24.0);
        assert!((t.shares - 100.0).abs() < 1e-12);

        let final_value = run.final_value().unwrap();
        assert!((final_value - (100_000.0 + 1_100.0)).abs() < 1e-6);
        assert_eq!(run.diagnostics.max_concurrent_positions, 1);
        assert!(run.open_positions.is_empty());
    }

    #[test]
    fn portfolio_is_marked_to_market_while_open() {
        let universe = [annotated("AAA", &RISING, &[0])];
        let mut sizer = FixedSizer::new(1_300.0);
        let run = run_portfolio(&universe, &[], &PortfolioParams::default(), &mut sizer);

        // Jan 5: bought 100 shares at 13, marked at the close 14.
        let jan5 = &run.equity_curve[4];
        assert_eq!(jan5.date, d(5));
        assert_eq!(jan5.n_positions, 1);
        assert!((jan5.cash - 98_700.0).abs() < 1e-9);
        assert!((jan5.portfolio_value - 100_100.0).abs() < 1e-9);
        assert_eq!(run.equity_curve[0].portfolio_value, 100_000.0);
    }

    #[test]
    fn flat_close_fails_the_rising_filter() {
        let mut closes = RISING;
        closes[3] = closes[2];
        let universe = [annotated("AAA", &closes, &[0])];
        let run = run_portfolio(
            &universe,
            &[],
            &PortfolioParams::default(),
            &mut FixedSizer::new(1_000.0),
        );
        assert_eq!(run.diagnostics.total_signals, 1);
        assert_eq!(run.diagnostics.signals_with_rising_closes, 0);
        assert!(run.trades.is_empty());
    }

    #[test]
    fn signal_too_close_to_the_end_never_enters() {
        // Signal at 16: rising closes on 17..=19 exist, entry bar 20 does not.
        let universe = [annotated("AAA", &RISING, &[16, 17])];
        let run = run_portfolio(
            &universe,
            &[],
            &PortfolioParams::default(),
            &mut FixedSizer::new(1_000.0),
        );
        assert_eq!(run.diagnostics.total_signals, 2);
        assert_eq!(run.diagnostics.signals_with_rising_closes, 1);
        assert_eq!(run.diagnostics.trades_executed, 0);
    }

    #[test]
    fn insufficient_cash_skips_the_entry() {
        let universe = [annotated("AAA", &RISING, &[0])];
        let params = PortfolioParams {
            initial_capital: 500.0,
            ..Default::default()
        };
        let run = run_portfolio(&universe, &[], &params, &mut FixedSizer::new(1_000.0));
        assert_eq!(run.diagnostics.insufficient_cash, 1);
        assert_eq!(run.diagnostics.trades_executed, 0);
        assert!(run.equity_curve.iter().all(|p| p.portfolio_value == 500.0));
    }

    #[test]
    fn exit_waits_for_a_trading_day() {
        // Drop Jan 15 (bar 14) from the ticker: the exit slides to Jan 16.
        let mut a = annotated("AAA", &RISING, &[0]);
        let mut bars = a.series.bars().to_vec();
        bars.remove(14);
        a.series = BarSeries::new("AAA", bars).unwrap();
        a.signal.pop();
        // Another ticker still trades on Jan 15.
        let b = annotated("BBB", &RISING, &[]);
        let run = run_portfolio(
            &[a, b],
            &[],
            &PortfolioParams::default(),
            &mut FixedSizer::new(1_300.0),
        );
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].exit_date, d(16));
        assert_eq!(run.trades[0].exit_price, 25.0);
    }

    #[test]
    fn unfinished_holding_stays_open() {
        let universe = [annotated("AAA", &RISING[..12], &[0])];
        let run = run_portfolio(
            &universe,
            &[],
            &PortfolioParams::default(),
            &mut FixedSizer::new(1_300.0),
        );
        assert!(run.trades.is_empty());
        assert_eq!(run.open_positions.len(), 1);
        assert_eq!(run.open_positions[0].exit_date, d(15));
        // Marked at the last close (21): 98_700 + 100 * 21.
        assert!((run.final_value().unwrap() - 100_800.0).abs() < 1e-9);
    }

    /// Records what the loop hands it.
    struct Recording {
        calls: Vec<(String, usize, usize, f64)>,
        closed: Vec<ClosedTrade>,
        dollars: f64,
    }

    impl PositionSizer for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn calculate_position_size(
            &mut self,
            symbol: &str,
            history: &[Bar],
            market: &[Bar],
            portfolio_value: f64,
        ) -> PositionSize {
            self.calls
                .push((symbol.to_string(), history.len(), market.len(), portfolio_value));
            PositionSize::from_fraction(self.dollars / portfolio_value, portfolio_value)
        }

        fn update_trade_history(&mut self, trade: &ClosedTrade) {
            self.closed.push(trade.clone());
        }
    }

    #[test]
    fn sizer_sees_history_to_date_and_learns_from_exits() {
        let universe = [annotated("AAA", &RISING, &[0, 4])];
        let market: Vec<Bar> = (1..=25).map(|day| bar(day, 100.0, 100.0)).collect();
        let mut sizer = Recording {
            calls: Vec::new(),
            closed: Vec::new(),
            dollars: 1_000.0,
        };
        let run = run_portfolio(&universe, &market, &PortfolioParams::default(), &mut sizer);

        // Entries on Jan 5 (bar 4) and Jan 9 (bar 8).
        assert_eq!(sizer.calls.len(), 2);
        assert_eq!(sizer.calls[0], ("AAA".to_string(), 5, 5, 100_000.0));
        assert_eq!(sizer.calls[1].1, 9);
        assert_eq!(sizer.calls[1].2, 9);
        assert_eq!(sizer.closed, run.trades);
        assert_eq!(run.diagnostics.max_concurrent_positions, 2);
        // Market dates extend the calendar past the ticker's last bar.
        assert_eq!(run.equity_curve.len(), 25);
    }

    #[test]
    fn zero_sized_entries_are_counted_separately() {
        let universe = [annotated("AAA", &RISING, &[0])];
        let mut sizer = Recording {
            calls: Vec::new(),
            closed: Vec::new(),
            dollars: 0.0,
        };
        let run = run_portfolio(&universe, &[], &PortfolioParams::default(), &mut sizer);
        assert_eq!(run.diagnostics.zero_size, 1);
        assert_eq!(run.diagnostics.insufficient_cash, 0);
        assert!(run.trades.is_empty());
    }

    #[test]
    fn same_day_entries_keep_universe_order() {
        let universe = [
            annotated("AAA", &RISING, &[0]),
            annotated("BBB", &RISING, &[0]),
        ];
        let params = PortfolioParams {
            initial_capital: 1_500.0,
            ..Default::default()
        };
        let run = run_portfolio(&universe, &[], &params, &mut FixedSizer::new(1_000.0));
        assert_eq!(run.diagnostics.trades_executed, 1);
        assert_eq!(run.diagnostics.insufficient_cash, 1);
        assert_eq!(run.trades[0].symbol, "AAA");
    }
}
