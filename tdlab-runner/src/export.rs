//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! A backtest writes three artifacts:
//! - **summary.json**: the full `BacktestResult`, schema-versioned
//! - **equity.csv**: daily portfolio value, cash and open positions
//! - **trades.csv**: the closed-trade tape
//!
//! Unknown schema versions are rejected on load.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tdlab_core::ClosedTrade;

use crate::backtest::EquityPoint;
use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: ticker, entry_date, exit_date, entry_price, exit_price, shares,
/// initial_value, final_value, pnl, return
pub fn export_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "ticker",
        "entry_date",
        "exit_date",
        "entry_price",
        "exit_price",
        "shares",
        "initial_value",
        "final_value",
        "pnl",
        "return",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.symbol,
            &t.entry_date.to_string(),
            &t.exit_date.to_string(),
            &format!("{:.6}", t.entry_price),
            &format!("{:.6}", t.exit_price),
            &format!("{:.6}", t.shares),
            &format!("{:.2}", t.initial_value()),
            &format!("{:.2}", t.final_value()),
            &format!("{:.2}", t.pnl()),
            &format!("{:.6}", t.return_pct()),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: date, portfolio_value, cash, n_positions
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "portfolio_value", "cash", "n_positions"])?;
    for p in equity_curve {
        wtr.write_record([
            &p.date.to_string(),
            &format!("{:.2}", p.portfolio_value),
            &format!("{:.2}", p.cash),
            &p.n_positions.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `summary.json`, `equity.csv` and `trades.csv` into `output_dir`.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create artifact dir: {}", output_dir.display()))?;

    let write = |name: &str, body: String| -> Result<()> {
        let path = output_dir.join(name);
        std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))
    };

    write("summary.json", export_json(result)?)?;
    write("equity.csv", export_equity_csv(&result.equity_curve)?)?;
    write("trades.csv", export_trades_csv(&result.trades)?)?;
    write("report.md", generate_report(result))?;

    log::info!("Artifacts written to {}", output_dir.display());
    Ok(())
}

/// Load a `BacktestResult` from an artifact directory's summary.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("summary.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Human-readable single-run report.
pub fn generate_report(result: &BacktestResult) -> String {
    let m = &result.metrics;
    let d = &result.diagnostics;
    let mut md = String::with_capacity(2048);

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Signal | {} |\n", result.signal));
    md.push_str(&format!("| Sizer | {} |\n", result.sizer));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        result.start_date, result.end_date
    ));
    md.push_str(&format!(
        "| Tickers | {} traded, {} skipped |\n",
        result.symbols.len(),
        result.skipped.len()
    ));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    if result.has_synthetic {
        md.push_str("| Data | **SYNTHETIC** |\n");
    }
    md.push('\n');

    md.push_str("## Signal Flow\n\n");
    md.push_str("| Stage | Count |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Signals | {} |\n", d.total_signals));
    md.push_str(&format!(
        "| With rising closes | {} |\n",
        d.signals_with_rising_closes
    ));
    md.push_str(&format!("| Trades executed | {} |\n", d.trades_executed));
    md.push_str(&format!("| Insufficient cash | {} |\n", d.insufficient_cash));
    md.push('\n');

    md.push_str("## Performance\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Initial Capital | ${:.2} |\n", m.initial_capital));
    md.push_str(&format!("| Final Value | ${:.2} |\n", m.final_value));
    md.push_str(&format!("| Total Return | {:.2}% |\n", m.total_return * 100.0));
    md.push_str(&format!("| PnL | ${:.2} |\n", m.pnl));
    md.push_str(&format!("| Trades | {} |\n", m.trade_count));
    md.push_str(&format!("| Win Rate | {:.2}% |\n", m.win_rate * 100.0));
    md.push_str(&format!(
        "| Average Trade Return | {:.2}% |\n",
        m.avg_trade_return * 100.0
    ));
    md.push_str(&format!("| Sharpe | {:.2} |\n", m.sharpe));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", m.max_drawdown * 100.0));
    md.push_str(&format!(
        "| Max Concurrent Positions | {} |\n",
        m.max_concurrent_positions
    ));

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trade() -> ClosedTrade {
        ClosedTrade {
            symbol: "AAPL".into(),
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            entry_price: 100.0,
            exit_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            exit_price: 105.0,
            shares: 10.0,
        }
    }

    #[test]
    fn trades_csv_has_header_and_derived_columns() {
        let csv = export_trades_csv(&[trade()]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("ticker,entry_date,exit_date,entry_price,exit_price,shares,initial_value,final_value,pnl,return")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("AAPL,2024-01-05,2024-01-15,"));
        assert!(row.ends_with(",1000.00,1050.00,50.00,0.050000"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn equity_csv_rows() {
        let points = [EquityPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            portfolio_value: 100_000.0,
            cash: 99_000.0,
            n_positions: 1,
        }];
        let csv = export_equity_csv(&points).unwrap();
        assert_eq!(
            csv,
            "date,portfolio_value,cash,n_positions\n2024-01-02,100000.00,99000.00,1\n"
        );
    }

    #[test]
    fn empty_tapes_still_have_headers() {
        assert_eq!(export_trades_csv(&[]).unwrap().lines().count(), 1);
        assert_eq!(export_equity_csv(&[]).unwrap().lines().count(), 1);
    }
}
