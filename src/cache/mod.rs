//! Staleness-aware cache in front of the market and financial providers.
//!
//! For price bars and investor flows each request is resolved against the
//! store first; only the suffix after the newest cached date is fetched,
//! persisted (batched upsert, last write wins) and merged into the answer.
//! Financial statements are cached by row-count sufficiency instead of date
//! coverage, since one provider call returns both frequencies.
//!
//! Provider errors and timeouts never propagate: they are logged and the
//! cache answers with whatever it already holds (possibly nothing).

use crate::config::CacheConfig;
use crate::error::ScreenerError;
use crate::models::{
    DailyBar, Dated, FinancialHistory, FinancialPeriod, Frequency, InvestorFlow, Market, Ticker,
    UniverseSnapshot,
};
use crate::provider::{FinancialProvider, MarketDataProvider};
use crate::storage::Repository;
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What must be fetched to answer `[start, end]` given the cached rows.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FetchPlan {
    Hit,
    From(NaiveDate),
}

fn plan<T: Dated>(cached: &[T], start: NaiveDate, end: NaiveDate) -> FetchPlan {
    match cached.iter().map(Dated::date).max() {
        Some(max) if max >= end => FetchPlan::Hit,
        Some(max) => FetchPlan::From(max + Duration::days(1)),
        None => FetchPlan::From(start),
    }
}

/// Union keyed by date, later rows winning, sorted ascending.
fn merge_by_date<T: Dated>(cached: Vec<T>, fetched: Vec<T>) -> Vec<T> {
    let mut by_date: BTreeMap<NaiveDate, T> = BTreeMap::new();
    for row in cached.into_iter().chain(fetched) {
        by_date.insert(row.date(), row);
    }
    by_date.into_values().collect()
}

fn within<T: Dated>(rows: Vec<T>, start: NaiveDate, end: NaiveDate) -> Vec<T> {
    let rows = rows.into_iter().filter(|r| r.date() >= start && r.date() <= end).collect();
    merge_by_date(Vec::new(), rows)
}

fn dedup_periods(ticker: &str, rows: Vec<FinancialPeriod>) -> Vec<FinancialPeriod> {
    let mut by_period: BTreeMap<String, FinancialPeriod> = BTreeMap::new();
    for mut row in rows {
        row.ticker = ticker.to_string();
        by_period.insert(row.period.clone(), row);
    }
    by_period.into_values().collect()
}

pub struct CacheManager {
    repo: Arc<Repository>,
    market: Arc<dyn MarketDataProvider>,
    financial: Arc<dyn FinancialProvider>,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(
        repo: Arc<Repository>,
        market: Arc<dyn MarketDataProvider>,
        financial: Arc<dyn FinancialProvider>,
        config: CacheConfig,
    ) -> Self {
        Self { repo, market, financial, config }
    }

    /// Same providers, separate database connection.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            repo: Arc::new(self.repo.try_clone()?),
            market: Arc::clone(&self.market),
            financial: Arc::clone(&self.financial),
            config: self.config.clone(),
        })
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Awaits a provider call under the fetch timeout. Failures are logged
    /// and reported as `None`.
    async fn fetch<T>(
        &self,
        operation: &'static str,
        ticker: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.config.fetch_timeout(), call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                let err = ScreenerError::ProviderUnavailable {
                    operation,
                    ticker: ticker.to_string(),
                    reason: format!("{:#}", e),
                };
                warn!("{}", err);
                None
            }
            Err(_) => {
                let err = ScreenerError::Timeout {
                    operation,
                    ticker: ticker.to_string(),
                    secs: self.config.fetch_timeout_secs,
                };
                warn!("{}", err);
                None
            }
        }
    }

    // ── Ticker master ─────────────────────────────────────────────────────────

    /// Refreshes both markets' listings and returns the stored master list,
    /// sector information included.
    pub async fn ensure_ticker_list(&self, asof: NaiveDate) -> Result<Vec<Ticker>> {
        let mut fetched = Vec::new();
        for market in Market::ALL {
            if let Some(list) = self.fetch("ticker_list", market.as_str(), self.market.ticker_list(market, asof)).await {
                debug!("{}: {} tickers", market, list.len());
                fetched.extend(list);
            }
        }

        if !fetched.is_empty() {
            self.repo.upsert_tickers(&fetched, self.config.batch_size)?;
        }
        let stored = self.repo.list_tickers()?;
        info!("Ticker master: {} fetched, {} stored", fetched.len(), stored.len());
        Ok(stored)
    }

    /// Today's bar for the whole universe in one call; not persisted.
    /// `None` when the provider could not answer.
    pub async fn universe_snapshot(&self, asof: NaiveDate) -> Option<UniverseSnapshot> {
        let snapshot = self.fetch("universe_snapshot", "*", self.market.universe_snapshot(asof)).await?;
        info!("Universe snapshot {}: {} rows", asof, snapshot.len());
        Some(snapshot)
    }

    // ── Staleness ─────────────────────────────────────────────────────────────

    /// Tickers whose cached bars or flows end more than `stale_tolerance_days`
    /// before `end`. A cheap pre-filter for bulk refresh; exact gap filling
    /// still happens per ticker in `ensure_bars` / `ensure_flows`.
    pub fn find_stale_tickers(
        &self,
        tickers: &[String],
        bar_start: NaiveDate,
        flow_start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<String>> {
        let threshold = end - Duration::days(self.config.stale_tolerance_days);

        let bars = self.repo.latest_bar_dates(bar_start)?;
        let flows = self.repo.latest_flow_dates(flow_start)?;
        let fresh = |latest: Option<&NaiveDate>| latest.is_some_and(|d| *d >= threshold);

        Ok(tickers
            .iter()
            .filter(|t| !(fresh(bars.get(t.as_str())) && fresh(flows.get(t.as_str()))))
            .cloned()
            .collect())
    }

    // ── Price bars ────────────────────────────────────────────────────────────

    pub async fn ensure_bars(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        ScreenerError::check_range(start, end)?;

        let cached = self.repo.bars_between(ticker, start, end)?;
        let from = match plan(&cached, start, end) {
            FetchPlan::Hit => return Ok(cached),
            FetchPlan::From(from) => from,
        };

        let fetched = self
            .fetch("bar_history", ticker, self.market.bar_history(ticker, from, end))
            .await
            .unwrap_or_default();
        let fetched = within(fetched, start, end);
        if !fetched.is_empty() {
            self.repo.upsert_bars(&fetched, self.config.batch_size)?;
        }
        debug!("{}: bars cached={} fetched={} from {}", ticker, cached.len(), fetched.len(), from);

        Ok(merge_by_date(cached, fetched))
    }

    // ── Investor flows ────────────────────────────────────────────────────────

    pub async fn ensure_flows(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<InvestorFlow>> {
        ScreenerError::check_range(start, end)?;

        let cached = self.repo.flows_between(ticker, start, end)?;
        let from = match plan(&cached, start, end) {
            FetchPlan::Hit => return Ok(cached),
            FetchPlan::From(from) => from,
        };

        let fetched = self
            .fetch("flow_history", ticker, self.market.flow_history(ticker, from, end))
            .await
            .unwrap_or_default();
        let fetched = within(fetched, start, end);
        if !fetched.is_empty() {
            self.repo.upsert_flows(&fetched, self.config.batch_size)?;
        }
        debug!("{}: flows cached={} fetched={} from {}", ticker, cached.len(), fetched.len(), from);

        Ok(merge_by_date(cached, fetched))
    }

    // ── Financial statements ──────────────────────────────────────────────────

    /// Serves cached periods when both frequencies meet their minimum counts.
    /// Otherwise calls the provider once and persists both series, while a
    /// frequency that was already sufficient is still answered from cache.
    pub async fn ensure_financials(&self, ticker: &str) -> Result<FinancialHistory> {
        let cached_q = self.repo.financials(ticker, Frequency::Quarterly)?;
        let cached_a = self.repo.financials(ticker, Frequency::Annual)?;
        let q_hit = cached_q.len() >= self.config.min_quarterly_periods;
        let a_hit = cached_a.len() >= self.config.min_annual_periods;

        if q_hit && a_hit {
            return Ok(FinancialHistory { quarterly: cached_q, annual: cached_a });
        }

        let Some(fetched) = self.fetch("statements", ticker, self.financial.statements(ticker)).await else {
            return Ok(FinancialHistory { quarterly: cached_q, annual: cached_a });
        };

        let fetched_q = dedup_periods(ticker, fetched.quarterly);
        let fetched_a = dedup_periods(ticker, fetched.annual);
        let to_store: Vec<FinancialPeriod> = fetched_q.iter().chain(&fetched_a).cloned().collect();
        self.repo.upsert_financials(&to_store, self.config.batch_size)?;
        debug!("{}: statements fetched q={} a={}", ticker, fetched_q.len(), fetched_a.len());

        let pick = |hit: bool, cached: Vec<FinancialPeriod>, fetched: Vec<FinancialPeriod>| {
            if hit || fetched.is_empty() { cached } else { fetched }
        };
        Ok(FinancialHistory {
            quarterly: pick(q_hit, cached_q, fetched_q),
            annual: pick(a_hit, cached_a, fetched_a),
        })
    }
}
