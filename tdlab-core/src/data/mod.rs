//! Market data: providers and the bounded-retry download

pub mod csv_file;
pub mod download;
pub mod provider;
pub mod yahoo;

pub use csv_file::CsvProvider;
pub use download::{download, download_symbols, DownloadOutcome, DownloadSummary, RetryPolicy};
pub use provider::{
    DataError, DataProvider, DataSource, DownloadProgress, FetchResult, SilentProgress,
    StdoutProgress,
};
pub use yahoo::YahooProvider;
