//! In-memory provider that records every call, for cache and screener tests.

use super::{FinancialProvider, MarketDataProvider};
use crate::models::{
    DailyBar, FinancialHistory, InvestorFlow, Market, SnapshotRow, Ticker, UniverseSnapshot,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Tickers(Market),
    Bars(String, NaiveDate, NaiveDate),
    Snapshot(NaiveDate),
    Flows(String, NaiveDate, NaiveDate),
    Statements(String),
}

#[derive(Default)]
pub struct MockProvider {
    tickers: Mutex<Vec<Ticker>>,
    bars: Mutex<HashMap<String, Vec<DailyBar>>>,
    flows: Mutex<HashMap<String, Vec<InvestorFlow>>>,
    statements: Mutex<HashMap<String, FinancialHistory>>,
    snapshot: Mutex<Vec<SnapshotRow>>,
    calls: Mutex<Vec<Call>>,
    failing: AtomicBool,
    hanging: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        *self.tickers.lock().unwrap() = tickers;
    }

    pub fn set_bars(&self, ticker: &str, bars: Vec<DailyBar>) {
        self.bars.lock().unwrap().insert(ticker.to_string(), bars);
    }

    pub fn set_flows(&self, ticker: &str, flows: Vec<InvestorFlow>) {
        self.flows.lock().unwrap().insert(ticker.to_string(), flows);
    }

    pub fn set_statements(&self, ticker: &str, history: FinancialHistory) {
        self.statements.lock().unwrap().insert(ticker.to_string(), history);
    }

    pub fn set_snapshot(&self, rows: Vec<SnapshotRow>) {
        *self.snapshot.lock().unwrap() = rows;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every call sleeps far past any fetch timeout.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bar_calls(&self, ticker: &str) -> Vec<(NaiveDate, NaiveDate)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Bars(t, s, e) if t == ticker => Some((s, e)),
                _ => None,
            })
            .collect()
    }

    pub fn flow_calls(&self, ticker: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Flows(t, _, _) if t == ticker))
            .count()
    }

    pub fn statement_calls(&self, ticker: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Statements(t) if t == ticker))
            .count()
    }

    async fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("mock provider offline");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn ticker_list(&self, market: Market, _asof: NaiveDate) -> Result<Vec<Ticker>> {
        self.record(Call::Tickers(market)).await?;
        Ok(self
            .tickers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.market == market)
            .cloned()
            .collect())
    }

    async fn bar_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        self.record(Call::Bars(ticker.to_string(), start, end)).await?;
        Ok(self
            .bars
            .lock()
            .unwrap()
            .get(ticker)
            .map(|bars| bars.iter().filter(|b| b.date >= start && b.date <= end).cloned().collect())
            .unwrap_or_default())
    }

    async fn universe_snapshot(&self, asof: NaiveDate) -> Result<UniverseSnapshot> {
        self.record(Call::Snapshot(asof)).await?;
        Ok(UniverseSnapshot::from_rows(self.snapshot.lock().unwrap().clone()))
    }

    async fn flow_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<InvestorFlow>> {
        self.record(Call::Flows(ticker.to_string(), start, end)).await?;
        Ok(self
            .flows
            .lock()
            .unwrap()
            .get(ticker)
            .map(|flows| flows.iter().filter(|f| f.date >= start && f.date <= end).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl FinancialProvider for MockProvider {
    async fn statements(&self, ticker: &str) -> Result<FinancialHistory> {
        self.record(Call::Statements(ticker.to_string())).await?;
        Ok(self.statements.lock().unwrap().get(ticker).cloned().unwrap_or_default())
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Weekdays in `[start, end]`.
pub fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut d = start;
    while d <= end {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

/// The last `closes.len()` trading days ending on `end`, one bar per close.
pub fn bars_ending(ticker: &str, end: NaiveDate, closes: &[f64], volume: i64) -> Vec<DailyBar> {
    let mut days = trading_days(end - Duration::days(closes.len() as i64 * 2 + 10), end);
    let days = days.split_off(days.len() - closes.len());
    days.into_iter()
        .zip(closes)
        .map(|(date, &close)| DailyBar {
            ticker: ticker.to_string(),
            date,
            open: close * 0.99,
            high: close,
            low: close * 0.98,
            close,
            volume,
        })
        .collect()
}

pub fn flow(ticker: &str, date: NaiveDate, foreign: f64, institution: f64) -> InvestorFlow {
    super::approximate_flow(ticker, date, foreign, institution, None, None)
}
