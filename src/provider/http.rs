//! JSON market-data gateway client.
//!
//! Endpoints (all `GET`, dates as `YYYY-MM-DD`):
//!   `/tickers?market=KOSPI&date=…`        → `[{ticker, name, sector_code?, sector_name?}]`
//!   `/bars/{ticker}?start=…&end=…`        → `[{date, open, high, low, close, volume}]`
//!   `/snapshot?date=…`                    → `[{ticker, market, open, high, low, close, volume, change, change_pct, market_cap}]`
//!   `/flows/{ticker}?start=…&end=…`       → `[{date, foreign, institution, individual?, program_net_buy?}]`
//!   `/financials/{ticker}`                → `{quarterly: [...], annual: [...]}`

use super::values::{lenient_date, lenient_f64, lenient_i64, normalise_period, normalise_ticker};
use super::{FinancialProvider, MarketDataProvider, approximate_flow};
use crate::config::ProviderConfig;
use crate::models::{
    DailyBar, FinancialHistory, FinancialPeriod, Frequency, InvestorFlow, Market, SnapshotRow, Ticker,
    UniverseSnapshot,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

// ── HTTP client ───────────────────────────────────────────────────────────────

enum FetchError {
    /// Network error, 429 or 5xx: worth another attempt.
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl FetchError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            FetchError::Retryable(e) | FetchError::Fatal(e) => e,
        }
    }
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: ProviderConfig,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as JSON with rate-limiting and retry.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.polite_delay().await;

        // 2^n * request_delay_ms
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.request_delay_ms.max(1))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.config.max_retries as usize);

        let mut attempt = 0u32;
        RetryIf::start(
            strategy,
            || {
                attempt += 1;
                let url = url.clone();
                debug!("GET {} (attempt {})", url, attempt);
                async move { self.attempt(url).await }
            },
            |e: &FetchError| matches!(e, FetchError::Retryable(_)),
        )
        .await
        .map_err(FetchError::into_inner)
        .with_context(|| format!("GET {}", url))
    }

    async fn attempt<T: DeserializeOwned>(&self, url: Url) -> std::result::Result<T, FetchError> {
        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Retryable(anyhow!("Request error: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| FetchError::Fatal(anyhow!("Malformed response body: {}", e)));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            warn!("Gateway busy ({}), backing off", status);
            return Err(FetchError::Retryable(anyhow!("HTTP {}", status)));
        }
        Err(FetchError::Fatal(anyhow!("HTTP error {}", status)))
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter_ms = rand::rng().random_range(0..=self.config.jitter_ms);
        sleep(Duration::from_millis(self.config.request_delay_ms + jitter_ms)).await;
    }
}

// ── Wire rows ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireTicker {
    ticker: String,
    #[serde(default)]
    name: String,
    sector_code: Option<String>,
    sector_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBar {
    #[serde(deserialize_with = "lenient_date")]
    date: NaiveDate,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireSnapshotRow {
    ticker: String,
    market: Option<Market>,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    volume: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireFlow {
    #[serde(deserialize_with = "lenient_date")]
    date: NaiveDate,
    #[serde(default, deserialize_with = "lenient_f64")]
    foreign: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    institution: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    individual: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    program_net_buy: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WirePeriod {
    period: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    operating_income: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    net_income: Option<f64>,
    #[serde(default)]
    is_estimate: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireStatements {
    #[serde(default)]
    quarterly: Vec<WirePeriod>,
    #[serde(default)]
    annual: Vec<WirePeriod>,
}

fn bar_from_wire(ticker: &str, w: WireBar) -> Option<DailyBar> {
    let close = w.close.filter(|c| *c > 0.0)?;
    Some(DailyBar {
        ticker: ticker.to_string(),
        date: w.date,
        open: w.open.unwrap_or(close),
        high: w.high.unwrap_or(close),
        low: w.low.unwrap_or(close),
        close,
        volume: w.volume.unwrap_or(0),
    })
}

fn periods_from_wire(ticker: &str, rows: Vec<WirePeriod>, frequency: Frequency) -> Vec<FinancialPeriod> {
    rows.into_iter()
        .filter(|w| w.operating_income.is_some())
        .map(|w| {
            let (period, marked) = normalise_period(&w.period, frequency == Frequency::Annual);
            FinancialPeriod {
                ticker: ticker.to_string(),
                period,
                frequency,
                revenue: w.revenue.unwrap_or(0.0),
                operating_income: w.operating_income.unwrap_or(0.0),
                net_income: w.net_income.unwrap_or(0.0),
                is_estimate: w.is_estimate || marked,
            }
        })
        .collect()
}

// ── Provider ──────────────────────────────────────────────────────────────────

pub struct HttpProvider {
    client: HttpClient,
    base_url: Url,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid provider base_url {:?}", config.base_url))?;
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url,
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("base_url {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn range_query(start: NaiveDate, end: NaiveDate) -> [(&'static str, String); 2] {
        [("start", start.to_string()), ("end", end.to_string())]
    }
}

#[async_trait]
impl MarketDataProvider for HttpProvider {
    async fn ticker_list(&self, market: Market, asof: NaiveDate) -> Result<Vec<Ticker>> {
        let url = self.url(
            &["tickers"],
            &[("market", market.as_str().to_string()), ("date", asof.to_string())],
        )?;
        let rows: Vec<WireTicker> = self.client.get_json(url).await?;
        Ok(rows
            .into_iter()
            .filter(|r| !r.ticker.trim().is_empty())
            .map(|r| Ticker {
                ticker: normalise_ticker(&r.ticker),
                name: r.name.trim().to_string(),
                market,
                sector_code: r.sector_code,
                sector_name: r.sector_name,
            })
            .collect())
    }

    async fn bar_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        let url = self.url(&["bars", ticker], &Self::range_query(start, end))?;
        let rows: Vec<WireBar> = self.client.get_json(url).await?;
        Ok(rows
            .into_iter()
            .filter(|w| w.date >= start && w.date <= end)
            .filter_map(|w| bar_from_wire(ticker, w))
            .collect())
    }

    async fn universe_snapshot(&self, asof: NaiveDate) -> Result<UniverseSnapshot> {
        let url = self.url(&["snapshot"], &[("date", asof.to_string())])?;
        let rows: Vec<WireSnapshotRow> = self.client.get_json(url).await?;
        Ok(UniverseSnapshot::from_rows(rows.into_iter().map(|w| SnapshotRow {
            ticker: normalise_ticker(&w.ticker),
            market: w.market,
            open: w.open,
            high: w.high,
            low: w.low,
            close: w.close,
            volume: w.volume,
            change: w.change,
            change_pct: w.change_pct,
            market_cap: w.market_cap,
        })))
    }

    async fn flow_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<InvestorFlow>> {
        let url = self.url(&["flows", ticker], &Self::range_query(start, end))?;
        let rows: Vec<WireFlow> = self.client.get_json(url).await?;
        Ok(rows
            .into_iter()
            .filter(|w| w.date >= start && w.date <= end)
            .map(|w| {
                approximate_flow(
                    ticker,
                    w.date,
                    w.foreign.unwrap_or(0.0),
                    w.institution.unwrap_or(0.0),
                    w.individual,
                    w.program_net_buy,
                )
            })
            .collect())
    }
}

#[async_trait]
impl FinancialProvider for HttpProvider {
    async fn statements(&self, ticker: &str) -> Result<FinancialHistory> {
        let url = self.url(&["financials", ticker], &[])?;
        let wire: WireStatements = self.client.get_json(url).await?;
        let mut history = FinancialHistory {
            quarterly: periods_from_wire(ticker, wire.quarterly, Frequency::Quarterly),
            annual: periods_from_wire(ticker, wire.annual, Frequency::Annual),
        };
        history.sort();
        Ok(history)
    }
}
