//! CSV file provider: one `<SYMBOL>.csv` per symbol under a directory.
//!
//! Files carry a `date,open,high,low,close` header (extra columns are ignored)
//! with ISO dates. Rows may be in any order; duplicates keep the first row.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::domain::{Bar, BarSeries};

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Clone)]
pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    fn read_bars(path: &Path) -> Result<Vec<Bar>, DataError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut bars = Vec::new();
        for row in reader.deserialize() {
            let row: CsvRow = row?;
            bars.push(Bar {
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
            });
        }
        Ok(bars)
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        let bars: Vec<Bar> = Self::read_bars(&path)?
            .into_iter()
            .filter(|b| b.date >= start && b.date < end)
            .collect();
        if bars.is_empty() {
            return Err(DataError::EmptyDataset {
                symbol: symbol.to_string(),
            });
        }

        Ok(FetchResult {
            series: BarSeries::from_unordered(symbol, bars),
            source: DataSource::CsvImport,
        })
    }
}
