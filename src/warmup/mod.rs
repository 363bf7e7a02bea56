//! Bulk cache warm-up ahead of a screening run.
//!
//!   1. Refresh the ticker master list
//!   2. Pre-filter to tickers whose bars or flows are stale
//!   3. A fixed pool of workers, each with its own `CacheManager` (and so its
//!      own database connection), ensures bars and flows ticker by ticker
//!
//! Idempotent: a second run on the same day finds nothing stale.

use crate::cache::CacheManager;
use crate::config::WarmUpConfig;
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct WarmUpStats {
    pub tickers_total: usize,
    pub stale: usize,
    pub processed: usize,
    pub bars: usize,
    pub flows: usize,
    pub errors: usize,
}

pub struct WarmUp {
    cache: CacheManager,
    config: WarmUpConfig,
}

impl WarmUp {
    pub fn new(cache: CacheManager, config: WarmUpConfig) -> Self {
        Self { cache, config }
    }

    pub async fn run(&self, asof: NaiveDate) -> Result<WarmUpStats> {
        info!("=== Step 1: Refreshing ticker master ===");
        let tickers: Vec<String> = self
            .cache
            .ensure_ticker_list(asof)
            .await?
            .into_iter()
            .map(|t| t.ticker)
            .collect();

        let cfg = self.cache.config();
        let bar_start = asof - Duration::days(cfg.bar_history_days);
        let flow_start = asof - Duration::days(cfg.flow_history_days);

        info!("=== Step 2: Staleness check ({} tickers) ===", tickers.len());
        let stale = self.cache.find_stale_tickers(&tickers, bar_start, flow_start, asof)?;
        let queue: VecDeque<String> = tickers.iter().filter(|t| stale.contains(*t)).cloned().collect();

        let mut stats = WarmUpStats {
            tickers_total: tickers.len(),
            stale: queue.len(),
            ..WarmUpStats::default()
        };
        if queue.is_empty() {
            info!("=== Done: cache already fresh for {} ===", asof);
            return Ok(stats);
        }

        let workers = self.config.workers.clamp(1, queue.len());
        info!("=== Step 3: Refreshing {} stale tickers with {} workers ===", queue.len(), workers);

        let total = queue.len();
        let queue = Arc::new(Mutex::new(queue));
        let done = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let cache = self.cache.try_clone()?;
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);

            handles.push(tokio::spawn(async move {
                let mut local = WarmUpStats::default();
                loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some(ticker) = next else { break };

                    match refresh(&cache, &ticker, bar_start, flow_start, asof).await {
                        Ok((bars, flows)) => {
                            local.bars += bars;
                            local.flows += flows;
                        }
                        Err(e) => {
                            warn!("{}: {:#}", ticker, e);
                            local.errors += 1;
                        }
                    }
                    local.processed += 1;

                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % PROGRESS_EVERY == 0 || n == total {
                        info!("Warm-up progress: {}/{}", n, total);
                    }
                }
                local
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(local) => {
                    stats.processed += local.processed;
                    stats.bars += local.bars;
                    stats.flows += local.flows;
                    stats.errors += local.errors;
                }
                Err(e) => {
                    error!("Warm-up worker panicked: {}", e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "=== Done: {} stale of {} | {} bars | {} flow rows | {} errors ===",
            stats.stale, stats.tickers_total, stats.bars, stats.flows, stats.errors
        );
        Ok(stats)
    }
}

async fn refresh(
    cache: &CacheManager,
    ticker: &str,
    bar_start: NaiveDate,
    flow_start: NaiveDate,
    asof: NaiveDate,
) -> Result<(usize, usize)> {
    let bars = cache.ensure_bars(ticker, bar_start, asof).await?;
    let flows = cache.ensure_flows(ticker, flow_start, asof).await?;
    Ok((bars.len(), flows.len()))
}
