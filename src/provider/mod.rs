pub mod http;
#[cfg(test)]
pub mod mock;
pub mod values;

use crate::models::{DailyBar, FinancialHistory, InvestorFlow, Market, Ticker, UniverseSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use self::http::HttpProvider;

// ── Source traits ─────────────────────────────────────────────────────────────

/// Swappable market data source. Implementations may fail on transient
/// errors; `CacheManager` is the only caller and degrades gracefully.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn ticker_list(&self, market: Market, asof: NaiveDate) -> Result<Vec<Ticker>>;

    /// Daily bars for `[start, end]`, any order.
    async fn bar_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>>;

    /// The `asof` bar of every listed ticker, in one call.
    async fn universe_snapshot(&self, asof: NaiveDate) -> Result<UniverseSnapshot>;

    async fn flow_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<InvestorFlow>>;
}

/// Quarterly and annual statements come back from a single call.
#[async_trait]
pub trait FinancialProvider: Send + Sync {
    async fn statements(&self, ticker: &str) -> Result<FinancialHistory>;
}

/// Builds a flow row when the source only reports foreign and institution net buying.
///
/// Data-quality caveat: without a program-trading feed, `program_net_buy` is
/// approximated as `foreign + institution`, and without a retail feed
/// `individual` is approximated as `-(foreign + institution)`. Supply/demand
/// thresholds were tuned against these approximations.
pub fn approximate_flow(
    ticker: &str,
    date: NaiveDate,
    foreign: f64,
    institution: f64,
    individual: Option<f64>,
    program_net_buy: Option<f64>,
) -> InvestorFlow {
    InvestorFlow {
        ticker: ticker.to_string(),
        date,
        individual: individual.unwrap_or(-(foreign + institution)),
        foreign,
        institution,
        program_net_buy: program_net_buy.unwrap_or(foreign + institution),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_approximation_when_feeds_missing() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let f = approximate_flow("005930", d, 1_000.0, -300.0, None, None);
        assert_eq!(f.program_net_buy, 700.0);
        assert_eq!(f.individual, -700.0);

        let f = approximate_flow("005930", d, 1_000.0, -300.0, Some(5.0), Some(9.0));
        assert_eq!(f.program_net_buy, 9.0);
        assert_eq!(f.individual, 5.0);
    }
}
