//! Four-stage screening funnel.
//!
//! 1. Universe snapshot, filtered column-wise (price + minimum volume).
//! 2. Technical conditions over cached price history.
//! 3. Supply conditions over cached investor flows.
//! 4. Financial conditions over cached statements.
//!
//! Each per-ticker stage is a short-circuit AND over the strategy's list
//! for that stage; an empty list skips the stage. The run's survivors
//! replace any stored results for the same run date.

use super::condition::{ConditionInput, ScreeningCondition};
use super::strategy::{Stage, Strategy, StrategyRegistry};
use crate::cache::CacheManager;
use crate::config::ScreeningConfig;
use crate::models::{
    DailyBar, FinancialHistory, InvestorFlow, ScreeningCandidate, ScreeningResult, SummaryRecord, Ticker,
    UniverseSnapshot,
};
use crate::utils::{Timer, fmt_elapsed, fmt_market_cap, fmt_number};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sampled tickers kept per stage for the funnel report.
const MAX_STAGE_TRACK: usize = 10;
const LOG_WIDTH: usize = 70;

// ── Funnel bookkeeping ────────────────────────────────────────────────────────

/// Per-run counters. Observability only; nothing downstream depends on it.
#[derive(Debug, Clone)]
pub struct FilterSummary {
    pub run_date: NaiveDate,
    pub strategy: String,
    pub snapshot_available: bool,
    pub total: usize,
    pub first_filter_passed: usize,
    pub final_passed: usize,
    condition_passed: HashMap<&'static str, usize>,
    shortages: HashMap<&'static str, usize>,
    stage_elapsed: Vec<(&'static str, Duration)>,
    samples: HashMap<&'static str, Vec<String>>,
}

impl FilterSummary {
    fn new(run_date: NaiveDate, strategy: &str) -> Self {
        Self {
            run_date,
            strategy: strategy.to_string(),
            snapshot_available: true,
            total: 0,
            first_filter_passed: 0,
            final_passed: 0,
            condition_passed: HashMap::new(),
            shortages: HashMap::new(),
            stage_elapsed: Vec::new(),
            samples: HashMap::new(),
        }
    }

    fn track(&mut self, key: &'static str, name: &str, ticker: &str) {
        let samples = self.samples.entry(key).or_default();
        if samples.len() < MAX_STAGE_TRACK {
            samples.push(format!("{}({})", name, ticker));
        }
    }

    fn record_pass(&mut self, condition: &'static str, name: &str, ticker: &str) {
        *self.condition_passed.entry(condition).or_default() += 1;
        self.track(condition, name, ticker);
    }

    fn record_shortage(&mut self, condition: &'static str) {
        *self.shortages.entry(condition).or_default() += 1;
    }

    fn record_elapsed(&mut self, stage: &'static str, elapsed: Duration) {
        self.stage_elapsed.push((stage, elapsed));
    }

    /// Tickers that passed `condition`.
    pub fn passed(&self, condition: &str) -> usize {
        self.condition_passed.get(condition).copied().unwrap_or(0)
    }

    /// Tickers dropped at `condition` for lack of history.
    pub fn shortage(&self, condition: &str) -> usize {
        self.shortages.get(condition).copied().unwrap_or(0)
    }

    pub fn elapsed(&self, stage: &str) -> Option<Duration> {
        self.stage_elapsed.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    pub fn samples(&self, key: &str) -> &[String] {
        self.samples.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_record(&self, strategy: &Strategy) -> SummaryRecord {
        let counts = |source: &HashMap<&'static str, usize>| {
            let map: Map<String, Value> = strategy
                .condition_names()
                .into_iter()
                .map(|n| (n.to_string(), json!(source.get(n).copied().unwrap_or(0))))
                .collect();
            Value::Object(map)
        };
        let elapsed: Map<String, Value> = self
            .stage_elapsed
            .iter()
            .map(|(s, d)| (s.to_string(), json!((d.as_secs_f64() * 1000.0).round() / 1000.0)))
            .collect();

        SummaryRecord {
            run_date: self.run_date,
            strategy: self.strategy.clone(),
            total: self.total as i64,
            first_filter_passed: self.first_filter_passed as i64,
            condition_passed: counts(&self.condition_passed),
            data_shortage: counts(&self.shortages),
            stage_elapsed: Value::Object(elapsed),
            final_passed: self.final_passed as i64,
            created_at: Utc::now().naive_utc(),
        }
    }
}

// ── Stage 1 ───────────────────────────────────────────────────────────────────

/// Column-wise stage 1 predicate: positive prices, close above open, volume
/// at least `min_volume`, and a positive change. The change predicate is
/// skipped when the snapshot carries no change values at all.
pub fn first_filter_mask(snapshot: &UniverseSnapshot, min_volume: i64) -> Vec<bool> {
    let has_change = snapshot.change.iter().any(|c| !c.is_nan());
    snapshot
        .close
        .iter()
        .zip(&snapshot.open)
        .zip(&snapshot.volume)
        .zip(&snapshot.change)
        .map(|(((&close, &open), &volume), &change)| {
            close > 0.0 && open > 0.0 && close > open && volume >= min_volume && (!has_change || change > 0.0)
        })
        .collect()
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Stable ranking: change% descending, then ticker ascending.
pub fn rank_results(results: &mut [ScreeningResult]) {
    results.sort_by(|a, b| {
        b.change_pct
            .total_cmp(&a.change_pct)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
}

// ── Screener ──────────────────────────────────────────────────────────────────

/// What a per-ticker stage loads before evaluating its conditions.
enum StageData {
    Bars(Vec<DailyBar>),
    Flows(Vec<InvestorFlow>),
    Financials(FinancialHistory),
}

impl StageData {
    fn input<'a>(&'a self, ticker: &'a str) -> ConditionInput<'a> {
        match self {
            StageData::Bars(bars) => ConditionInput::new(ticker, bars),
            StageData::Flows(flows) => ConditionInput::new(ticker, &[]).with_flows(flows),
            StageData::Financials(history) => ConditionInput::new(ticker, &[]).with_financials(history),
        }
    }
}

pub struct Screener {
    cache: CacheManager,
    strategy: Arc<Strategy>,
    config: ScreeningConfig,
}

impl Screener {
    pub fn new(cache: CacheManager, strategy: Arc<Strategy>, config: ScreeningConfig) -> Self {
        Self { cache, strategy, config }
    }

    /// Resolves `name` before anything touches the cache, so an unknown
    /// strategy fails the request without per-ticker work.
    pub fn from_registry(
        cache: CacheManager,
        registry: &StrategyRegistry,
        name: &str,
        config: ScreeningConfig,
    ) -> Result<Self> {
        let strategy = registry.get(name)?;
        Ok(Self::new(cache, strategy, config))
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Runs the funnel for `run_date` and persists results plus summary.
    /// An unavailable snapshot yields an empty, unpersisted run.
    pub async fn run(&self, run_date: NaiveDate) -> Result<(Vec<ScreeningResult>, FilterSummary)> {
        let started = Instant::now();
        info!("=== Screening {} (strategy: {}) ===", run_date, self.strategy.name);
        let mut summary = FilterSummary::new(run_date, &self.strategy.name);

        let timer = Timer::start("ticker master");
        let masters: HashMap<String, Ticker> = self
            .cache
            .ensure_ticker_list(run_date)
            .await?
            .into_iter()
            .map(|t| (t.ticker.clone(), t))
            .collect();
        summary.record_elapsed("ticker_master", timer.finish());

        let Some(snapshot) = self.cache.universe_snapshot(run_date).await else {
            warn!("Universe snapshot for {} unavailable; stored results left untouched", run_date);
            summary.snapshot_available = false;
            summary.record_elapsed("total", started.elapsed());
            return Ok((Vec::new(), summary));
        };

        let timer = Timer::start("first filter");
        let mut candidates = self.first_filter(&snapshot, &masters, &mut summary);
        summary.record_elapsed("first_filter", timer.finish());
        info!("First filter: {} / {} passed", summary.first_filter_passed, summary.total);

        for stage in Stage::ALL {
            let conditions = self.strategy.conditions(stage);
            if candidates.is_empty() {
                break;
            }
            if conditions.is_empty() {
                debug!("{} stage skipped: no conditions", stage);
                continue;
            }
            let timer = Timer::start(format!("{} filter", stage));
            candidates = self.filter_stage(stage, conditions, run_date, candidates, &mut summary).await;
            summary.record_elapsed(stage.as_str(), timer.finish());
            info!("{} filter: {} passed", stage, candidates.len());
        }

        let mut results: Vec<ScreeningResult> = candidates
            .into_iter()
            .map(|c| c.into_result(run_date, &self.strategy.name))
            .collect();
        rank_results(&mut results);
        summary.final_passed = results.len();
        summary.record_elapsed("total", started.elapsed());

        self.log_summary(&summary);
        self.log_results(&results);

        let repo = self.cache.repository();
        let stored = repo.replace_results(run_date, &results)?;
        repo.upsert_summary(&summary.to_record(&self.strategy))?;
        info!("Stored {} results for {}", stored, run_date);

        Ok((results, summary))
    }

    fn first_filter(
        &self,
        snapshot: &UniverseSnapshot,
        masters: &HashMap<String, Ticker>,
        summary: &mut FilterSummary,
    ) -> Vec<ScreeningCandidate> {
        summary.total = snapshot.len();
        let mask = first_filter_mask(snapshot, self.config.volume.min_volume);

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (i, _) in mask.iter().enumerate().filter(|(_, keep)| **keep) {
            let ticker = &snapshot.tickers[i];
            if !seen.insert(ticker.as_str()) {
                continue;
            }
            let master = masters.get(ticker);
            let name = master.map(|m| m.name.clone()).unwrap_or_else(|| ticker.clone());

            let mut conditions = Map::new();
            conditions.insert("price_preliminary".into(), json!({ "P-1": true, "P-2": true }));
            summary.track("first_filter", &name, ticker);
            candidates.push(ScreeningCandidate {
                ticker: ticker.clone(),
                name,
                market: snapshot.markets[i].or(master.map(|m| m.market)),
                sector: master.and_then(|m| m.sector_name.clone()).unwrap_or_default(),
                close: snapshot.close[i],
                open: snapshot.open[i],
                volume: snapshot.volume[i],
                market_cap: finite_or_zero(snapshot.market_cap[i]),
                change_pct: (finite_or_zero(snapshot.change_pct[i]) * 100.0).round() / 100.0,
                conditions,
            });
        }

        summary.first_filter_passed = candidates.len();
        candidates
    }

    fn lookback_days(&self, stage: Stage) -> i64 {
        match stage {
            Stage::Technical => (self.strategy.required_bars() as i64 + 10) * 2,
            Stage::Supply => self.config.supply_demand.periods.iter().copied().max().unwrap_or(1) as i64 * 2,
            Stage::Financial => 0,
        }
    }

    async fn load(&self, stage: Stage, ticker: &str, run_date: NaiveDate) -> Result<StageData> {
        let start = run_date - chrono::Duration::days(self.lookback_days(stage));
        Ok(match stage {
            Stage::Technical => StageData::Bars(self.cache.ensure_bars(ticker, start, run_date).await?),
            Stage::Supply => StageData::Flows(self.cache.ensure_flows(ticker, start, run_date).await?),
            Stage::Financial => StageData::Financials(self.cache.ensure_financials(ticker).await?),
        })
    }

    /// One per-ticker stage. A ticker whose data cannot be loaded is dropped
    /// with a warning; the rest of the stage continues.
    async fn filter_stage(
        &self,
        stage: Stage,
        conditions: &[Box<dyn ScreeningCondition>],
        run_date: NaiveDate,
        candidates: Vec<ScreeningCandidate>,
        summary: &mut FilterSummary,
    ) -> Vec<ScreeningCandidate> {
        let mut passed = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            let data = match self.load(stage, &candidate.ticker, run_date).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("{}: {} data unavailable: {:#}", candidate.ticker, stage, e);
                    continue;
                }
            };
            let ticker = candidate.ticker.clone();
            let input = data.input(&ticker);
            if evaluate_all(conditions, &input, &mut candidate, summary) {
                passed.push(candidate);
            }
        }
        passed
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    fn log_summary(&self, s: &FilterSummary) {
        let elapsed = |key: &str| match s.elapsed(key) {
            Some(d) => format!(" ({})", fmt_elapsed(d)),
            None => String::new(),
        };
        let pct = |n: usize, of: usize| if of > 0 { n as f64 / of as f64 * 100.0 } else { 0.0 };
        let samples = |key: &str, count: usize| {
            let list = s.samples(key);
            (count > 0 && count < MAX_STAGE_TRACK && !list.is_empty()).then(|| format!("         {}", list.join(", ")))
        };

        let mut lines = vec![
            String::new(),
            "═".repeat(LOG_WIDTH),
            format!("  Screening funnel (strategy: {})", s.strategy),
            "═".repeat(LOG_WIDTH),
            String::new(),
            format!("  Universe: {}", fmt_number(s.total as i64)),
            String::new(),
            format!("  [prep] ticker master{}", elapsed("ticker_master")),
            String::new(),
            format!("  [stage 1] snapshot filter{}", elapsed("first_filter")),
            format!(
                "    rule: close > open AND change > 0 AND volume >= {}",
                fmt_number(self.config.volume.min_volume)
            ),
            format!(
                "    {} passed ({:.1}%)",
                fmt_number(s.first_filter_passed as i64),
                pct(s.first_filter_passed, s.total)
            ),
        ];
        lines.extend(samples("first_filter", s.first_filter_passed));

        let mut prev = s.first_filter_passed;
        for (n, stage) in Stage::ALL.iter().enumerate() {
            let conditions = self.strategy.conditions(*stage);
            if conditions.is_empty() {
                continue;
            }
            lines.push(String::new());
            lines.push(format!("  [stage {}] {}{}", n + 2, stage, elapsed(stage.as_str())));
            for c in conditions {
                let count = s.passed(c.name());
                let short = s.shortage(c.name());
                let mut line = format!("    {}: {} passed ({:.1}%)", c.name(), fmt_number(count as i64), pct(count, prev));
                if short > 0 {
                    line.push_str(&format!(", {} short of data", short));
                }
                lines.push(line);
                lines.push(format!("      rule: {}", c.describe()));
                lines.extend(samples(c.name(), count));
                prev = count;
            }
        }

        lines.push(String::new());
        lines.push(format!("  >> selected: {}{}", fmt_number(s.final_passed as i64), elapsed("total")));
        lines.push("═".repeat(LOG_WIDTH));
        info!("{}", lines.join("\n"));
    }

    fn log_results(&self, results: &[ScreeningResult]) {
        if results.is_empty() {
            return;
        }
        let mut lines = vec![
            String::new(),
            "═".repeat(LOG_WIDTH),
            format!("  Selected tickers ({})", results.len()),
            "═".repeat(LOG_WIDTH),
        ];
        for (idx, r) in results.iter().enumerate() {
            lines.push(String::new());
            lines.push(format!("─ {}. {} ({})", idx + 1, r.name, r.ticker));
            lines.push(format!(
                "  close {:.0} / volume {} / cap {} / {:+.2}%",
                r.close,
                fmt_number(r.volume),
                fmt_market_cap(r.market_cap),
                r.change_pct
            ));
            for stage in Stage::ALL {
                for c in self.strategy.conditions(stage) {
                    if let Some(Value::Object(d)) = r.conditions.get(c.name()) {
                        lines.push(format!("  [{}] {}", c.name(), c.summarize(d)));
                    }
                }
            }
        }
        lines.push(String::new());
        lines.push("─".repeat(LOG_WIDTH));
        info!("{}", lines.join("\n"));
    }
}

/// Short-circuit AND. Passing conditions are counted and their details merged
/// into the candidate; evaluation stops at the first failure.
fn evaluate_all(
    conditions: &[Box<dyn ScreeningCondition>],
    input: &ConditionInput<'_>,
    candidate: &mut ScreeningCandidate,
    summary: &mut FilterSummary,
) -> bool {
    for condition in conditions {
        let result = condition.evaluate(input);
        if !result.passed {
            if result.shortage {
                summary.record_shortage(condition.name());
            }
            debug!("{}: {} failed (shortage: {})", candidate.ticker, condition.name(), result.shortage);
            return false;
        }
        summary.record_pass(condition.name(), &candidate.name, &candidate.ticker);
        candidate
            .conditions
            .insert(condition.name().to_string(), Value::Object(result.details));
    }
    true
}
