use crate::models::{
    DailyBar, FinancialPeriod, Frequency, InvestorFlow, Market, ScreeningResult, SummaryRecord,
    Ticker,
};
use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, Statement, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS tickers (
    ticker       VARCHAR PRIMARY KEY,
    name         VARCHAR NOT NULL DEFAULT '',
    market       VARCHAR NOT NULL,
    sector_code  VARCHAR,
    sector_name  VARCHAR,
    updated_at   TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_bars (
    ticker      VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    open        DOUBLE   NOT NULL,
    high        DOUBLE   NOT NULL,
    low         DOUBLE   NOT NULL,
    close       DOUBLE   NOT NULL,
    volume      BIGINT   NOT NULL,
    PRIMARY KEY (ticker, date)
);

-- program_net_buy / individual may hold provider approximations
CREATE TABLE IF NOT EXISTS investor_flows (
    ticker          VARCHAR NOT NULL,
    date            DATE    NOT NULL,
    individual      DOUBLE  NOT NULL DEFAULT 0,
    foreign_net     DOUBLE  NOT NULL DEFAULT 0,
    institution     DOUBLE  NOT NULL DEFAULT 0,
    program_net_buy DOUBLE  NOT NULL DEFAULT 0,
    PRIMARY KEY (ticker, date)
);

CREATE TABLE IF NOT EXISTS financial_periods (
    ticker           VARCHAR NOT NULL,
    period           VARCHAR NOT NULL,
    frequency        VARCHAR NOT NULL,
    revenue          DOUBLE  NOT NULL DEFAULT 0,
    operating_income DOUBLE  NOT NULL DEFAULT 0,
    net_income       DOUBLE  NOT NULL DEFAULT 0,
    is_estimate      BOOLEAN NOT NULL DEFAULT false,
    PRIMARY KEY (ticker, period, frequency)
);

CREATE TABLE IF NOT EXISTS screening_results (
    run_date    DATE    NOT NULL,
    ticker      VARCHAR NOT NULL,
    name        VARCHAR NOT NULL,
    market      VARCHAR,
    sector      VARCHAR NOT NULL DEFAULT '',
    close       DOUBLE  NOT NULL,
    volume      BIGINT  NOT NULL,
    market_cap  DOUBLE  NOT NULL DEFAULT 0,
    change_pct  DOUBLE  NOT NULL DEFAULT 0,
    conditions  VARCHAR NOT NULL DEFAULT '{}',
    strategy    VARCHAR NOT NULL,
    created_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (run_date, ticker)
);

CREATE TABLE IF NOT EXISTS screening_summaries (
    run_date            DATE PRIMARY KEY,
    strategy            VARCHAR NOT NULL,
    total               BIGINT  NOT NULL,
    first_filter_passed BIGINT  NOT NULL,
    condition_passed    VARCHAR NOT NULL,
    data_shortage       VARCHAR NOT NULL,
    stage_elapsed       VARCHAR NOT NULL,
    final_passed        BIGINT  NOT NULL,
    created_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB-backed store. Each handle owns one connection; `try_clone` hands a
/// worker its own connection to the same database.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    pub fn try_clone(&self) -> Result<Self> {
        let conn = self.conn()?.try_clone().context("Failed to clone DuckDB connection")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("DuckDB connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    /// Runs `sql` once per row, committing every `batch_size` rows as one
    /// transaction. Re-running the same rows leaves the key set unchanged.
    fn upsert_in_batches<T, F>(
        &self,
        rows: &[T],
        batch_size: usize,
        sql: &str,
        what: &str,
        bind: F,
    ) -> Result<usize>
    where
        F: Fn(&mut Statement<'_>, &T) -> duckdb::Result<usize>,
    {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        for chunk in rows.chunks(batch_size.max(1)) {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(sql)?;
                for row in chunk {
                    bind(&mut stmt, row).with_context(|| format!("upsert {}", what))?;
                }
            }
            tx.commit().with_context(|| format!("commit {} batch", what))?;
        }
        Ok(rows.len())
    }

    // ── Tickers ───────────────────────────────────────────────────────────────

    pub fn upsert_tickers(&self, tickers: &[Ticker], batch_size: usize) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let sql = r#"
            INSERT INTO tickers (ticker, name, market, sector_code, sector_name, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker) DO UPDATE SET
                name        = excluded.name,
                market      = excluded.market,
                sector_code = COALESCE(excluded.sector_code, tickers.sector_code),
                sector_name = COALESCE(excluded.sector_name, tickers.sector_name),
                updated_at  = excluded.updated_at
        "#;
        self.upsert_in_batches(tickers, batch_size, sql, "ticker", |stmt, t| {
            stmt.execute(params![
                t.ticker,
                t.name,
                t.market.as_str(),
                t.sector_code,
                t.sector_name,
                now,
            ])
        })
    }

    pub fn list_tickers(&self) -> Result<Vec<Ticker>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ticker, name, market, sector_code, sector_name FROM tickers ORDER BY ticker",
        )?;
        let raw = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let mut tickers = Vec::with_capacity(raw.len());
        for (ticker, name, market, sector_code, sector_name) in raw {
            match market.parse::<Market>() {
                Ok(market) => tickers.push(Ticker { ticker, name, market, sector_code, sector_name }),
                Err(e) => warn!("{}: skipping stored ticker: {:#}", ticker, e),
            }
        }
        Ok(tickers)
    }

    // ── Daily bars ────────────────────────────────────────────────────────────

    /// Last write wins on (ticker, date).
    pub fn upsert_bars(&self, bars: &[DailyBar], batch_size: usize) -> Result<usize> {
        let sql = r#"
            INSERT INTO daily_bars (ticker, date, open, high, low, close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, date) DO UPDATE SET
                open   = excluded.open,
                high   = excluded.high,
                low    = excluded.low,
                close  = excluded.close,
                volume = excluded.volume
        "#;
        self.upsert_in_batches(bars, batch_size, sql, "bar", |stmt, b| {
            stmt.execute(params![b.ticker, b.date, b.open, b.high, b.low, b.close, b.volume])
        })
    }

    pub fn bars_between(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT ticker, date, open, high, low, close, volume FROM daily_bars
               WHERE ticker = ? AND date >= ? AND date <= ?
               ORDER BY date"#,
        )?;
        let bars = stmt
            .query_map(params![ticker, start, end], |r| {
                Ok(DailyBar {
                    ticker: r.get(0)?,
                    date: r.get(1)?,
                    open: r.get(2)?,
                    high: r.get(3)?,
                    low: r.get(4)?,
                    close: r.get(5)?,
                    volume: r.get(6)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("read bars for {}", ticker))?;
        Ok(bars)
    }

    // ── Investor flows ────────────────────────────────────────────────────────

    pub fn upsert_flows(&self, flows: &[InvestorFlow], batch_size: usize) -> Result<usize> {
        let sql = r#"
            INSERT INTO investor_flows
                (ticker, date, individual, foreign_net, institution, program_net_buy)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, date) DO UPDATE SET
                individual      = excluded.individual,
                foreign_net     = excluded.foreign_net,
                institution     = excluded.institution,
                program_net_buy = excluded.program_net_buy
        "#;
        self.upsert_in_batches(flows, batch_size, sql, "flow", |stmt, f| {
            stmt.execute(params![
                f.ticker,
                f.date,
                f.individual,
                f.foreign,
                f.institution,
                f.program_net_buy,
            ])
        })
    }

    pub fn flows_between(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<InvestorFlow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT ticker, date, individual, foreign_net, institution, program_net_buy
               FROM investor_flows
               WHERE ticker = ? AND date >= ? AND date <= ?
               ORDER BY date"#,
        )?;
        let flows = stmt
            .query_map(params![ticker, start, end], |r| {
                Ok(InvestorFlow {
                    ticker: r.get(0)?,
                    date: r.get(1)?,
                    individual: r.get(2)?,
                    foreign: r.get(3)?,
                    institution: r.get(4)?,
                    program_net_buy: r.get(5)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("read flows for {}", ticker))?;
        Ok(flows)
    }

    // ── Staleness aggregates ──────────────────────────────────────────────────

    /// Per-ticker MAX(date) of bars on or after `since`, in one grouped query.
    pub fn latest_bar_dates(&self, since: NaiveDate) -> Result<HashMap<String, NaiveDate>> {
        self.latest_dates("daily_bars", since)
    }

    pub fn latest_flow_dates(&self, since: NaiveDate) -> Result<HashMap<String, NaiveDate>> {
        self.latest_dates("investor_flows", since)
    }

    fn latest_dates(&self, table: &'static str, since: NaiveDate) -> Result<HashMap<String, NaiveDate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT ticker, MAX(date) FROM {} WHERE date >= ? GROUP BY ticker",
            table
        ))?;
        let rows = stmt
            .query_map(params![since], |r| Ok((r.get::<_, String>(0)?, r.get::<_, NaiveDate>(1)?)))?
            .collect::<duckdb::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    // ── Financial statements ──────────────────────────────────────────────────

    pub fn upsert_financials(&self, periods: &[FinancialPeriod], batch_size: usize) -> Result<usize> {
        let sql = r#"
            INSERT INTO financial_periods
                (ticker, period, frequency, revenue, operating_income, net_income, is_estimate)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, period, frequency) DO UPDATE SET
                revenue          = excluded.revenue,
                operating_income = excluded.operating_income,
                net_income       = excluded.net_income,
                is_estimate      = excluded.is_estimate
        "#;
        self.upsert_in_batches(periods, batch_size, sql, "financial period", |stmt, p| {
            stmt.execute(params![
                p.ticker,
                p.period,
                p.frequency.as_str(),
                p.revenue,
                p.operating_income,
                p.net_income,
                p.is_estimate,
            ])
        })
    }

    /// Periods for one ticker and frequency, oldest first.
    pub fn financials(&self, ticker: &str, frequency: Frequency) -> Result<Vec<FinancialPeriod>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT ticker, period, frequency, revenue, operating_income, net_income, is_estimate
               FROM financial_periods
               WHERE ticker = ? AND frequency = ?
               ORDER BY period"#,
        )?;
        let rows = stmt
            .query_map(params![ticker, frequency.as_str()], |r| {
                let code: String = r.get(2)?;
                Ok((
                    code,
                    FinancialPeriod {
                        ticker: r.get(0)?,
                        period: r.get(1)?,
                        frequency,
                        revenue: r.get(3)?,
                        operating_income: r.get(4)?,
                        net_income: r.get(5)?,
                        is_estimate: r.get(6)?,
                    },
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(code, mut p)| {
                p.frequency = Frequency::from_code(&code)
                    .with_context(|| format!("financial_periods row {} {}", p.ticker, p.period))?;
                Ok(p)
            })
            .collect()
    }

    // ── Screening results ─────────────────────────────────────────────────────

    /// Deletes every stored result for `run_date` and inserts `results`, in one
    /// transaction.
    pub fn replace_results(&self, run_date: NaiveDate, results: &[ScreeningResult]) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM screening_results WHERE run_date = ?", params![run_date])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO screening_results
                   (run_date, ticker, name, market, sector, close, volume, market_cap,
                    change_pct, conditions, strategy, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for r in results {
                stmt.execute(params![
                    run_date,
                    r.ticker,
                    r.name,
                    r.market.map(Market::as_str),
                    r.sector,
                    r.close,
                    r.volume,
                    r.market_cap,
                    r.change_pct,
                    serde_json::to_string(&r.conditions)?,
                    r.strategy,
                    now,
                ])
                .with_context(|| format!("insert result {} {}", run_date, r.ticker))?;
            }
        }
        tx.commit()?;
        Ok(results.len())
    }

    pub fn results_for(&self, run_date: NaiveDate) -> Result<Vec<ScreeningResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT ticker, name, market, sector, close, volume, market_cap, change_pct,
                      conditions, strategy
               FROM screening_results WHERE run_date = ?
               ORDER BY change_pct DESC, ticker"#,
        )?;
        let raw = stmt
            .query_map(params![run_date], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, f64>(6)?,
                    r.get::<_, f64>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, String>(9)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(ticker, name, market, sector, close, volume, market_cap, change_pct, conditions, strategy)| {
                Ok(ScreeningResult {
                    run_date,
                    conditions: serde_json::from_str(&conditions)
                        .with_context(|| format!("conditions blob for {}", ticker))?,
                    market: market.and_then(|m| m.parse().ok()),
                    ticker,
                    name,
                    sector,
                    close,
                    volume,
                    market_cap,
                    change_pct,
                    strategy,
                })
            })
            .collect()
    }

    // ── Funnel summaries ──────────────────────────────────────────────────────

    pub fn upsert_summary(&self, s: &SummaryRecord) -> Result<()> {
        self.conn()?.execute(
            r#"INSERT INTO screening_summaries
               (run_date, strategy, total, first_filter_passed, condition_passed,
                data_shortage, stage_elapsed, final_passed, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (run_date) DO UPDATE SET
                   strategy            = excluded.strategy,
                   total               = excluded.total,
                   first_filter_passed = excluded.first_filter_passed,
                   condition_passed    = excluded.condition_passed,
                   data_shortage       = excluded.data_shortage,
                   stage_elapsed       = excluded.stage_elapsed,
                   final_passed        = excluded.final_passed,
                   created_at          = excluded.created_at"#,
            params![
                s.run_date,
                s.strategy,
                s.total,
                s.first_filter_passed,
                s.condition_passed.to_string(),
                s.data_shortage.to_string(),
                s.stage_elapsed.to_string(),
                s.final_passed,
                s.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn summary_for(&self, run_date: NaiveDate) -> Result<Option<SummaryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT strategy, total, first_filter_passed, condition_passed, data_shortage,
                      stage_elapsed, final_passed, created_at
               FROM screening_summaries WHERE run_date = ?"#,
        )?;
        let mut rows = stmt
            .query_map(params![run_date], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, NaiveDateTime>(7)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let Some((strategy, total, first, passed, shortage, elapsed, final_passed, created_at)) = rows.pop() else {
            return Ok(None);
        };
        Ok(Some(SummaryRecord {
            run_date,
            strategy,
            total,
            first_filter_passed: first,
            condition_passed: serde_json::from_str(&passed)?,
            data_shortage: serde_json::from_str(&shortage)?,
            stage_elapsed: serde_json::from_str(&elapsed)?,
            final_passed,
            created_at,
        }))
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    fn count(&self, table: &'static str) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare(&format!("SELECT COUNT(*) FROM {}", table))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn bar_count(&self) -> Result<i64> {
        self.count("daily_bars")
    }

    pub fn flow_count(&self) -> Result<i64> {
        self.count("investor_flows")
    }

    pub fn ticker_count(&self) -> Result<i64> {
        self.count("tickers")
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT MIN(date), MAX(date) FROM daily_bars")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(ticker: &str, date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            ticker: ticker.into(),
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn test_replaying_bar_upsert_keeps_one_row_per_date() {
        let repo = repo();
        let bars: Vec<_> = (5..=9).map(|day| bar("005930", d(2026, 1, day), 100.0)).collect();

        // batch size smaller than the input forces several commits
        repo.upsert_bars(&bars, 2).unwrap();
        repo.upsert_bars(&bars, 2).unwrap();
        assert_eq!(repo.bar_count().unwrap(), 5);

        // a correction to the latest date overwrites in place
        repo.upsert_bars(&[bar("005930", d(2026, 1, 9), 105.0)], 500).unwrap();
        let stored = repo.bars_between("005930", d(2026, 1, 1), d(2026, 1, 31)).unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored.last().unwrap().close, 105.0);
        assert!(stored.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_ticker_upsert_keeps_known_sector() {
        let repo = repo();
        let mut t = Ticker {
            ticker: "000660".into(),
            name: "Old".into(),
            market: Market::Kospi,
            sector_code: Some("278".into()),
            sector_name: Some("Semiconductors".into()),
        };
        repo.upsert_tickers(&[t.clone()], 500).unwrap();

        t.name = "New".into();
        t.sector_code = None;
        t.sector_name = None;
        repo.upsert_tickers(&[t], 500).unwrap();

        let stored = repo.list_tickers().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "New");
        assert_eq!(stored[0].sector_name.as_deref(), Some("Semiconductors"));
    }

    #[test]
    fn test_latest_dates_grouped_per_ticker() {
        let repo = repo();
        repo.upsert_bars(
            &[
                bar("A", d(2026, 1, 5), 1.0),
                bar("A", d(2026, 1, 9), 1.0),
                bar("B", d(2026, 1, 6), 1.0),
                bar("C", d(2025, 6, 1), 1.0),
            ],
            500,
        )
        .unwrap();

        let latest = repo.latest_bar_dates(d(2026, 1, 1)).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["A"], d(2026, 1, 9));
        assert_eq!(latest["B"], d(2026, 1, 6));
    }

    #[test]
    fn test_replace_results_drops_previous_run() {
        let repo = repo();
        let run = d(2026, 2, 13);
        let result = |ticker: &str, chg: f64| ScreeningResult {
            run_date: run,
            ticker: ticker.into(),
            name: ticker.into(),
            market: Some(Market::Kosdaq),
            sector: String::new(),
            close: 10.0,
            volume: 50_000,
            market_cap: 0.0,
            change_pct: chg,
            conditions: json!({"price": {"P1_close_gt_prev_close": true}}),
            strategy: "DEFAULT".into(),
        };

        repo.replace_results(run, &[result("A", 1.0), result("B", 2.0)]).unwrap();
        repo.replace_results(run, &[result("C", 3.0)]).unwrap();

        let stored = repo.results_for(run).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ticker, "C");
        assert_eq!(stored[0].market, Some(Market::Kosdaq));
        assert_eq!(stored[0].conditions["price"]["P1_close_gt_prev_close"], json!(true));
    }

    #[test]
    fn test_summary_upsert_one_row_per_date() {
        let repo = repo();
        let mut s = SummaryRecord {
            run_date: d(2026, 2, 13),
            strategy: "DEFAULT".into(),
            total: 2500,
            first_filter_passed: 300,
            condition_passed: json!({"price": 120}),
            data_shortage: json!({}),
            stage_elapsed: json!({"stage1": 0.2}),
            final_passed: 3,
            created_at: Utc::now().naive_utc(),
        };
        repo.upsert_summary(&s).unwrap();
        s.final_passed = 4;
        repo.upsert_summary(&s).unwrap();

        let stored = repo.summary_for(d(2026, 2, 13)).unwrap().unwrap();
        assert_eq!(stored.final_passed, 4);
        assert_eq!(stored.condition_passed, json!({"price": 120}));
        assert!(repo.summary_for(d(2026, 2, 12)).unwrap().is_none());
    }

    #[test]
    fn test_financials_ordered_by_period() {
        let repo = repo();
        let p = |period: &str, frequency, oi| FinancialPeriod {
            ticker: "X".into(),
            period: period.into(),
            frequency,
            revenue: 100.0,
            operating_income: oi,
            net_income: 1.0,
            is_estimate: false,
        };
        repo.upsert_financials(
            &[
                p("2025/06", Frequency::Quarterly, 3.0),
                p("2025/03", Frequency::Quarterly, 2.0),
                p("2024", Frequency::Annual, 9.0),
            ],
            500,
        )
        .unwrap();

        let q = repo.financials("X", Frequency::Quarterly).unwrap();
        assert_eq!(q.iter().map(|p| p.period.as_str()).collect::<Vec<_>>(), vec!["2025/03", "2025/06"]);
        assert!(q.iter().all(|p| p.frequency == Frequency::Quarterly));
        let annual = repo.financials("X", Frequency::Annual).unwrap();
        assert_eq!(annual.len(), 1);
        assert_eq!(annual[0].frequency, Frequency::Annual);
    }
}
