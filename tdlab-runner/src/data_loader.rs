//! Universe preparation: download → minimum-bar filter → detection → signal.
//!
//! For each configured symbol:
//! 1. Download with the configured retry policy
//! 2. If unavailable and `synthetic` is set → generate synthetic bars (tagged)
//! 3. Skip tickers with fewer than `min_bars` bars
//! 4. Run TD detection per ticker on the rayon pool and attach the signal
//!
//! The benchmark series is loaded the same way but never analyzed or traded.
//! Skipped tickers are logged and reported; they never fail the batch.

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tdlab_core::data::{download, download_symbols, DataProvider, DownloadOutcome, DownloadProgress};
use tdlab_core::{AnnotatedSeries, Bar, BarSeries, TdEngine};

use crate::config::{BacktestConfig, ConfigError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no usable symbols: all {total} requested tickers were skipped")]
    NoUsableSymbols { total: usize },
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// If true, generate synthetic bars when real data is unavailable.
    pub synthetic: bool,
}

/// Why a ticker was left out of detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    Unavailable { attempts: u32, last_error: String },
    TooFewBars { bars: usize, min: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

/// Analyzed tickers ready for the backtest loop.
#[derive(Debug, Clone)]
pub struct PreparedUniverse {
    /// Tickers that passed the filters, in configured order.
    pub annotated: Vec<AnnotatedSeries>,
    /// Market series for sizers; `None` when it could not be loaded.
    pub benchmark: Option<BarSeries>,
    pub skipped: Vec<SkippedSymbol>,
    /// BLAKE3 hash of every bar used, for reproducibility.
    pub dataset_hash: String,
    /// Whether any series (benchmark included) is synthetic.
    pub has_synthetic: bool,
}

impl PreparedUniverse {
    pub fn benchmark_bars(&self) -> &[Bar] {
        self.benchmark.as_ref().map_or(&[], BarSeries::bars)
    }
}

/// Download, filter and analyze every tradable symbol in `config`.
pub fn prepare_universe(
    config: &BacktestConfig,
    provider: &dyn DataProvider,
    opts: &LoadOptions,
    progress: &dyn DownloadProgress,
) -> Result<PreparedUniverse, LoadError> {
    let engine = TdEngine::new(config.detector.clone()).map_err(ConfigError::from)?;
    let bt = &config.backtest;
    let symbols = config.tradable_symbols();

    let summary = download_symbols(
        provider,
        &symbols,
        bt.start_date,
        bt.end_date,
        &config.retry,
        progress,
    );

    let mut has_synthetic = false;
    let mut skipped = Vec::new();
    let mut usable = Vec::with_capacity(symbols.len());

    for (symbol, outcome) in symbols.iter().zip(summary.outcomes) {
        let series = match resolve(symbol, outcome, bt.start_date, bt.end_date, opts) {
            Ok((series, synthetic)) => {
                has_synthetic |= synthetic;
                series
            }
            Err(reason) => {
                log::info!("Skipping {symbol}: data unavailable");
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason,
                });
                continue;
            }
        };

        if series.len() < bt.min_bars {
            log::info!(
                "Skipping {symbol}: only {} bars (minimum {})",
                series.len(),
                bt.min_bars
            );
            skipped.push(SkippedSymbol {
                symbol: symbol.clone(),
                reason: SkipReason::TooFewBars {
                    bars: series.len(),
                    min: bt.min_bars,
                },
            });
            continue;
        }
        usable.push(series);
    }

    if usable.is_empty() {
        return Err(LoadError::NoUsableSymbols {
            total: symbols.len(),
        });
    }

    let benchmark_outcome = download(
        provider,
        &bt.benchmark,
        bt.start_date,
        bt.end_date,
        &config.retry,
    );
    let benchmark = match resolve(&bt.benchmark, benchmark_outcome, bt.start_date, bt.end_date, opts) {
        Ok((series, synthetic)) => {
            has_synthetic |= synthetic;
            Some(series)
        }
        Err(_) => {
            log::warn!(
                "Benchmark {} unavailable; sizers will see an empty market history",
                bt.benchmark
            );
            None
        }
    };

    let family = config.signal;
    let annotated: Vec<AnnotatedSeries> = usable
        .into_par_iter()
        .map(|series| AnnotatedSeries::analyze(&engine, series, family))
        .collect();

    let dataset_hash = compute_dataset_hash(
        annotated
            .iter()
            .map(|a| &a.series)
            .chain(benchmark.as_ref()),
    );

    log::info!(
        "Prepared {} of {} tickers ({} skipped), {} signals on {family}",
        annotated.len(),
        symbols.len(),
        skipped.len(),
        annotated.iter().map(|a| a.signal_indices().count()).sum::<usize>()
    );

    Ok(PreparedUniverse {
        annotated,
        benchmark,
        skipped,
        dataset_hash,
        has_synthetic,
    })
}

/// Turn a download outcome into a series, falling back to synthetic bars when allowed.
fn resolve(
    symbol: &str,
    outcome: DownloadOutcome,
    start: NaiveDate,
    end: NaiveDate,
    opts: &LoadOptions,
) -> Result<(BarSeries, bool), SkipReason> {
    match outcome {
        DownloadOutcome::Available { series, .. } => Ok((series, false)),
        DownloadOutcome::Unavailable { .. } if opts.synthetic => {
            log::warn!("Generating synthetic data for {symbol}; results will be tagged as synthetic");
            Ok((generate_synthetic_series(symbol, start, end), true))
        }
        DownloadOutcome::Unavailable {
            attempts,
            last_error,
            ..
        } => Err(SkipReason::Unavailable {
            attempts,
            last_error,
        }),
    }
}

/// BLAKE3 over symbols and bars, sorted by symbol.
pub fn compute_dataset_hash<'a>(series: impl Iterator<Item = &'a BarSeries>) -> String {
    let mut all: Vec<&BarSeries> = series.collect();
    all.sort_by(|a, b| a.symbol().cmp(b.symbol()));

    let mut hasher = blake3::Hasher::new();
    for s in all {
        hasher.update(s.symbol().as_bytes());
        for bar in s.bars() {
            hasher.update(bar.date.to_string().as_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Deterministic random walk over the weekdays of `[start, end)`.
///
/// Seeded from the symbol name, so the same symbol always gets the same bars.
pub fn generate_synthetic_series(symbol: &str, start: NaiveDate, end: NaiveDate) -> BarSeries {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut bars = Vec::new();
    let mut price = 100.0_f64;
    let mut current = start;

    while current < end {
        let weekday = current.weekday();
        if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
            current += chrono::Duration::days(1);
            continue;
        }

        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));

        bars.push(Bar {
            date: current,
            open,
            high,
            low,
            close,
        });

        price = close;
        current += chrono::Duration::days(1);
    }

    BarSeries::from_unordered(symbol, bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tdlab_core::data::{DataError, DataSource, FetchResult, RetryPolicy, SilentProgress};

    /// Serves synthetic series of fixed length per symbol; unknown symbols fail.
    struct MapProvider {
        lengths: HashMap<&'static str, usize>,
    }

    impl DataProvider for MapProvider {
        fn name(&self) -> &str {
            "map"
        }

        fn fetch(
            &self,
            symbol: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            let n = *self
                .lengths
                .get(symbol)
                .ok_or_else(|| DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                })?;
            let far = start + chrono::Duration::days(10_000);
            let full = generate_synthetic_series(symbol, start, far);
            let bars = full.bars()[..n].to_vec();
            Ok(FetchResult {
                series: BarSeries::from_unordered(symbol, bars),
                source: DataSource::CsvImport,
            })
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config(symbols: &[&str]) -> BacktestConfig {
        let mut config = BacktestConfig::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            d(2022, 1, 3),
            d(2023, 1, 3),
        );
        config.retry = RetryPolicy::immediate(2);
        config
    }

    fn provider() -> MapProvider {
        MapProvider {
            lengths: HashMap::from([("AAA", 200), ("BBB", 49), ("CCC", 50), ("^GSPC", 200)]),
        }
    }

    #[test]
    fn filters_short_and_missing_tickers() {
        let universe = prepare_universe(
            &config(&["AAA", "BBB", "CCC", "ZZZ"]),
            &provider(),
            &LoadOptions::default(),
            &SilentProgress,
        )
        .unwrap();

        let kept: Vec<_> = universe.annotated.iter().map(|a| a.symbol()).collect();
        assert_eq!(kept, vec!["AAA", "CCC"]);
        assert_eq!(universe.skipped.len(), 2);
        assert_eq!(universe.skipped[0].symbol, "BBB");
        assert_eq!(
            universe.skipped[0].reason,
            SkipReason::TooFewBars { bars: 49, min: 50 }
        );
        assert_eq!(universe.skipped[1].symbol, "ZZZ");
        assert!(matches!(
            universe.skipped[1].reason,
            SkipReason::Unavailable { attempts: 2, .. }
        ));
        assert_eq!(universe.benchmark_bars().len(), 200);
        assert!(!universe.has_synthetic);
    }

    #[test]
    fn annotated_signal_matches_series_length() {
        let universe = prepare_universe(
            &config(&["AAA"]),
            &provider(),
            &LoadOptions::default(),
            &SilentProgress,
        )
        .unwrap();
        let a = &universe.annotated[0];
        assert_eq!(a.signal.len(), a.series.len());
    }

    #[test]
    fn benchmark_is_never_traded() {
        let universe = prepare_universe(
            &config(&["^GSPC", "AAA"]),
            &provider(),
            &LoadOptions::default(),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(universe.annotated.len(), 1);
        assert_eq!(universe.annotated[0].symbol(), "AAA");
    }

    #[test]
    fn all_skipped_is_an_error() {
        let result = prepare_universe(
            &config(&["BBB", "ZZZ"]),
            &provider(),
            &LoadOptions::default(),
            &SilentProgress,
        );
        assert!(matches!(result, Err(LoadError::NoUsableSymbols { total: 2 })));
    }

    #[test]
    fn synthetic_fallback_produces_tagged_data() {
        let universe = prepare_universe(
            &config(&["ZZZ"]),
            &provider(),
            &LoadOptions { synthetic: true },
            &SilentProgress,
        )
        .unwrap();
        assert!(universe.has_synthetic);
        assert_eq!(universe.annotated[0].symbol(), "ZZZ");
        assert!(universe.skipped.is_empty());
    }

    #[test]
    fn missing_benchmark_is_tolerated() {
        let mut p = provider();
        p.lengths.remove("^GSPC");
        let universe =
            prepare_universe(&config(&["AAA"]), &p, &LoadOptions::default(), &SilentProgress)
                .unwrap();
        assert!(universe.benchmark.is_none());
        assert!(universe.benchmark_bars().is_empty());
    }

    #[test]
    fn dataset_hash_is_deterministic() {
        let run = || {
            prepare_universe(
                &config(&["AAA", "CCC"]),
                &provider(),
                &LoadOptions::default(),
                &SilentProgress,
            )
            .unwrap()
            .dataset_hash
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn synthetic_data_is_deterministic() {
        let a = generate_synthetic_series("SPY", d(2024, 1, 1), d(2024, 3, 1));
        let b = generate_synthetic_series("SPY", d(2024, 1, 1), d(2024, 3, 1));
        assert_eq!(a, b);
        assert!(a.bars().iter().all(Bar::is_sane));
    }

    #[test]
    fn synthetic_skips_weekends_and_excludes_end() {
        // 2024-01-06 is a Saturday, 2024-01-08 a Monday.
        let s = generate_synthetic_series("QQQ", d(2024, 1, 1), d(2024, 1, 8));
        let dates: Vec<_> = s.bars().iter().map(|b| b.date).collect();
        assert_eq!(dates.len(), 5);
        assert_eq!(dates.last(), Some(&d(2024, 1, 5)));
    }

    #[test]
    fn different_symbols_get_different_synthetic_data() {
        let spy = generate_synthetic_series("SPY", d(2024, 1, 1), d(2024, 2, 1));
        let qqq = generate_synthetic_series("QQQ", d(2024, 1, 1), d(2024, 2, 1));
        assert_ne!(spy.bars()[5].close, qqq.bars()[5].close);
    }
}
