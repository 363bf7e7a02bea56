use anyhow::bail;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Structured evidence attached to a condition verdict.
pub type Details = Map<String, Value>;

// ── Market ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Kospi,
    Kosdaq,
}

impl Market {
    pub const ALL: [Market; 2] = [Market::Kospi, Market::Kosdaq];

    pub fn as_str(self) -> &'static str {
        match self {
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KOSPI" => Ok(Market::Kospi),
            "KOSDAQ" => Ok(Market::Kosdaq),
            other => bail!("unknown market '{}'", other),
        }
    }
}

// ── Ticker ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub ticker: String,
    pub name: String,
    pub market: Market,
    pub sector_code: Option<String>,
    pub sector_name: Option<String>,
}

// ── Time series rows ──────────────────────────────────────────────────────────

/// A row keyed by trading date within one ticker's series.
pub trait Dated {
    fn date(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Dated for DailyBar {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Net buying by investor class, in currency units.
///
/// `program_net_buy` and `individual` may be approximations derived from the
/// foreign and institution figures when the source has no dedicated feed; see
/// `provider::approximate_flow`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestorFlow {
    pub ticker: String,
    pub date: NaiveDate,
    pub individual: f64,
    pub foreign: f64,
    pub institution: f64,
    pub program_net_buy: f64,
}

impl Dated for InvestorFlow {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

// ── Financial statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Quarterly,
    Annual,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Quarterly => "Q",
            Frequency::Annual => "Y",
        }
    }

    pub fn from_code(s: &str) -> anyhow::Result<Self> {
        match s {
            "Q" => Ok(Frequency::Quarterly),
            "Y" => Ok(Frequency::Annual),
            other => bail!("unknown frequency code '{}'", other),
        }
    }
}

/// One income-statement period. `period` is `YYYY/MM` for quarters and `YYYY`
/// for years, so lexical order is chronological.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialPeriod {
    pub ticker: String,
    pub period: String,
    pub frequency: Frequency,
    pub revenue: f64,
    pub operating_income: f64,
    pub net_income: f64,
    pub is_estimate: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialHistory {
    pub quarterly: Vec<FinancialPeriod>,
    pub annual: Vec<FinancialPeriod>,
}

impl FinancialHistory {
    pub fn is_empty(&self) -> bool {
        self.quarterly.is_empty() && self.annual.is_empty()
    }

    pub fn sort(&mut self) {
        self.quarterly.sort_by(|a, b| a.period.cmp(&b.period));
        self.annual.sort_by(|a, b| a.period.cmp(&b.period));
    }
}

// ── Universe snapshot ─────────────────────────────────────────────────────────

/// One ticker's bar for the snapshot day as delivered by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotRow {
    pub ticker: String,
    pub market: Option<Market>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    /// close minus previous close
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub market_cap: Option<f64>,
}

/// Whole-universe bars for one day, stored column-wise so stage-one
/// predicates run over parallel arrays.
#[derive(Debug, Clone, Default)]
pub struct UniverseSnapshot {
    pub tickers: Vec<String>,
    pub markets: Vec<Option<Market>>,
    pub open: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<i64>,
    pub change: Vec<f64>,
    pub change_pct: Vec<f64>,
    pub market_cap: Vec<f64>,
}

impl UniverseSnapshot {
    /// Rows missing close, open or volume are dropped; a missing change
    /// becomes NaN.
    pub fn from_rows(rows: impl IntoIterator<Item = SnapshotRow>) -> Self {
        let mut s = Self::default();
        for row in rows {
            let (Some(open), Some(close), Some(volume)) = (row.open, row.close, row.volume) else {
                continue;
            };
            if !open.is_finite() || !close.is_finite() {
                continue;
            }
            s.tickers.push(row.ticker);
            s.markets.push(row.market);
            s.open.push(open);
            s.close.push(close);
            s.volume.push(volume);
            s.change.push(row.change.unwrap_or(f64::NAN));
            s.change_pct.push(row.change_pct.unwrap_or(0.0));
            s.market_cap.push(row.market_cap.unwrap_or(0.0));
        }
        s
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

// ── Screening ─────────────────────────────────────────────────────────────────

/// A ticker still alive in the funnel. Dropped as soon as a stage fails it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreeningCandidate {
    pub ticker: String,
    pub name: String,
    pub market: Option<Market>,
    pub sector: String,
    pub close: f64,
    pub open: f64,
    pub volume: i64,
    pub market_cap: f64,
    pub change_pct: f64,
    /// condition name → details, in evaluation order
    pub conditions: Details,
}

impl ScreeningCandidate {
    pub fn into_result(self, run_date: NaiveDate, strategy: &str) -> ScreeningResult {
        ScreeningResult {
            run_date,
            ticker: self.ticker,
            name: self.name,
            market: self.market,
            sector: self.sector,
            close: self.close,
            volume: self.volume,
            market_cap: self.market_cap,
            change_pct: self.change_pct,
            conditions: Value::Object(self.conditions),
            strategy: strategy.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreeningResult {
    pub run_date: NaiveDate,
    pub ticker: String,
    pub name: String,
    pub market: Option<Market>,
    pub sector: String,
    pub close: f64,
    pub volume: i64,
    pub market_cap: f64,
    pub change_pct: f64,
    pub conditions: Value,
    pub strategy: String,
}

/// Persisted funnel row, one per run date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub run_date: NaiveDate,
    pub strategy: String,
    pub total: i64,
    pub first_filter_passed: i64,
    pub condition_passed: Value,
    pub data_shortage: Value,
    pub stage_elapsed: Value,
    pub final_passed: i64,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_round_trip_is_case_insensitive() {
        assert_eq!("kosdaq".parse::<Market>().unwrap(), Market::Kosdaq);
        assert_eq!(Market::Kospi.to_string(), "KOSPI");
        assert!("NYSE".parse::<Market>().is_err());
    }

    #[test]
    fn test_frequency_codes() {
        for f in [Frequency::Quarterly, Frequency::Annual] {
            assert_eq!(Frequency::from_code(f.as_str()).unwrap(), f);
        }
        assert!(Frequency::from_code("M").is_err());
    }

    #[test]
    fn test_snapshot_drops_incomplete_rows() {
        let rows = vec![
            SnapshotRow {
                ticker: "000100".into(),
                open: Some(10.0),
                close: Some(11.0),
                volume: Some(50_000),
                change: Some(0.5),
                ..Default::default()
            },
            SnapshotRow {
                ticker: "000200".into(),
                open: None,
                close: Some(11.0),
                volume: Some(50_000),
                ..Default::default()
            },
            SnapshotRow {
                ticker: "000300".into(),
                open: Some(10.0),
                close: Some(9.0),
                volume: Some(1_000),
                ..Default::default()
            },
        ];
        let snap = UniverseSnapshot::from_rows(rows);
        assert_eq!(snap.tickers, vec!["000100", "000300"]);
        assert!(snap.change[1].is_nan());
        assert_eq!(snap.market_cap, vec![0.0, 0.0]);
    }

    #[test]
    fn test_financial_history_sorts_by_period() {
        let p = |period: &str| FinancialPeriod {
            ticker: "X".into(),
            period: period.into(),
            frequency: Frequency::Quarterly,
            revenue: 0.0,
            operating_income: 0.0,
            net_income: 0.0,
            is_estimate: false,
        };
        let mut h = FinancialHistory {
            quarterly: vec![p("2025/06"), p("2024/12"), p("2025/03")],
            annual: vec![],
        };
        h.sort();
        let order: Vec<_> = h.quarterly.iter().map(|q| q.period.as_str()).collect();
        assert_eq!(order, vec!["2024/12", "2025/03", "2025/06"]);
    }
}
