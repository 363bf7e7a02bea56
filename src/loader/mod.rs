//! CSV loader for bulk-importing historical daily bars into the cache.
//!
//! One file per ticker, named `<TICKER>.csv`, with a header row naming
//! `Date, Open, High, Low, Close, Volume` (any order, case-insensitive).

use crate::models::DailyBar;
use crate::provider::values::{normalise_ticker, parse_date, parse_number};
use crate::storage::Repository;
use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadStats {
    pub files: usize,
    pub bars: usize,
    pub errors: usize,
}

/// Ticker from the file stem: `005930.csv` → `005930`, `a_2024.csv` → `A`.
pub fn ticker_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let ticker = normalise_ticker(stem.split(['_', ' ', '.']).next()?);
    if ticker.is_empty() { None } else { Some(ticker) }
}

struct Columns {
    date: usize,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: usize,
    volume: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let required = |name: &str| find(name).with_context(|| format!("missing '{}' column", name));
        Ok(Self {
            date: required("date")?,
            open: find("open"),
            high: find("high"),
            low: find("low"),
            close: required("close")?,
            volume: required("volume")?,
        })
    }
}

/// Parses bars from CSV text. Rows without a date or a positive close are
/// skipped; missing open/high/low fall back to the close.
pub fn parse_bars<R: Read>(ticker: &str, reader: R) -> Result<Vec<DailyBar>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let cols = Columns::from_headers(reader.headers()?)?;

    let mut bars = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("{} row {}: {}", ticker, i + 1, e);
                continue;
            }
        };
        let field = |idx: usize| record.get(idx).and_then(parse_number);

        let Some(date) = record.get(cols.date).and_then(parse_date) else {
            debug!("{} row {}: no date", ticker, i + 1);
            continue;
        };
        let close = match field(cols.close) {
            Some(c) if c > 0.0 => c,
            _ => continue,
        };
        let or_close = |idx: Option<usize>| idx.and_then(field).unwrap_or(close);

        bars.push(DailyBar {
            ticker: ticker.to_string(),
            date,
            open: or_close(cols.open),
            high: or_close(cols.high),
            low: or_close(cols.low),
            close,
            volume: field(cols.volume).map(|v| v.round() as i64).unwrap_or(0),
        });
    }
    Ok(bars)
}

pub fn load_csv(path: &Path) -> Result<(String, Vec<DailyBar>)> {
    let Some(ticker) = ticker_from_filename(path) else {
        bail!("no ticker in filename {:?}", path);
    };
    let file = std::fs::File::open(path).with_context(|| format!("open {:?}", path))?;
    let bars = parse_bars(&ticker, file).with_context(|| format!("parse {:?}", path))?;
    info!("{}: {} bars loaded", ticker, bars.len());
    Ok((ticker, bars))
}

pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every CSV in `dir` through the batched bar upsert. A bad file is
/// logged and counted; it does not stop the import.
pub fn import_dir(repo: &Repository, dir: &Path, batch_size: usize) -> Result<LoadStats> {
    let files = discover_csv_files(dir)?;
    info!("Found {} CSV files in {:?}", files.len(), dir);

    let mut stats = LoadStats { files: files.len(), ..LoadStats::default() };
    for path in &files {
        match load_csv(path) {
            Ok((_, bars)) => stats.bars += repo.upsert_bars(&bars, batch_size)?,
            Err(e) => {
                warn!("Error loading {:?}: {:#}", path, e);
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_ticker_from_filename() {
        assert_eq!(ticker_from_filename(Path::new("data/005930.csv")).as_deref(), Some("005930"));
        assert_eq!(ticker_from_filename(Path::new("abc_history.csv")).as_deref(), Some("ABC"));
        assert_eq!(ticker_from_filename(Path::new("_x.csv")), None);
    }

    #[test]
    fn test_parse_bars_by_header_name() {
        let csv = "\
Date,Close,Open,High,Low,Volume
2026-02-12,\"71,000\",70000,71500,69800,\"12,345,678\"
2026-02-13,72000,,,,100
bad-date,1,1,1,1,1
2026-02-11,0,1,1,1,1
";
        let bars = parse_bars("005930", csv.as_bytes()).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2026, 2, 12).unwrap());
        assert_eq!(bars[0].close, 71_000.0);
        assert_eq!(bars[0].volume, 12_345_678);
        assert_eq!(bars[1].open, 72_000.0);
        assert_eq!(bars[1].low, 72_000.0);
    }

    #[test]
    fn test_missing_close_column_is_an_error() {
        let csv = "Date,Open,Volume\n2026-02-13,1,1\n";
        assert!(parse_bars("A", csv.as_bytes()).is_err());
    }

    #[test]
    fn test_import_dir_upserts_idempotently() {
        let dir = std::env::temp_dir().join(format!("screener-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("AAA.csv"), "Date,Open,High,Low,Close,Volume\n2026-02-13,1,2,1,2,10\n").unwrap();
        std::fs::write(dir.join("BBB.csv"), "Date,Volume\n2026-02-13,10\n").unwrap();

        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let first = tokio_test::assert_ok!(import_dir(&repo, &dir, 500));
        let second = tokio_test::assert_ok!(import_dir(&repo, &dir, 500));
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(first, LoadStats { files: 2, bars: 1, errors: 1 });
        assert_eq!(second, first);
        assert_eq!(repo.bar_count().unwrap(), 1);
    }
}
