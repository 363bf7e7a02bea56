mod cache;
mod config;
mod engine;
mod error;
mod loader;
mod models;
mod provider;
mod storage;
mod utils;
mod warmup;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cache::CacheManager;
use crate::config::AppConfig;
use crate::engine::{Screener, StrategyRegistry};
use crate::provider::{FinancialProvider, HttpProvider, MarketDataProvider};
use crate::storage::Repository;
use crate::warmup::WarmUp;

#[derive(Parser)]
#[command(name = "equity-screener", about = "Daily equity screening with a local market data cache", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the screening funnel for one trading day
    Screen {
        /// Strategy name (see `strategies`); defaults to screening.default_strategy
        #[arg(short, long, env = "SCREENER_STRATEGY")]
        strategy: Option<String>,

        /// Run date, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Refresh cached bars and flows for every stale ticker
    Warm {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Bulk-load daily bars from <TICKER>.csv files
    LoadCsv {
        /// Directory containing CSV files
        #[arg(short, long, default_value = "data/csv")]
        dir: PathBuf,
    },

    /// List registered strategies
    Strategies,

    /// Show stored results and funnel summary for a run date
    Results {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn open_repository(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open DuckDB at {:?}", config.storage.db_path))?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Arc::new(repo))
}

fn cache_manager(config: &AppConfig) -> Result<CacheManager> {
    let repo = open_repository(config)?;
    let provider = Arc::new(HttpProvider::new(&config.provider).context("Failed to build provider client")?);
    Ok(CacheManager::new(
        repo,
        provider.clone() as Arc<dyn MarketDataProvider>,
        provider as Arc<dyn FinancialProvider>,
        config.cache.clone(),
    ))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "equity_screener=info,warn",
        1 => "equity_screener=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Screen { strategy, date } => {
            let date = date.unwrap_or_else(today);
            let name = strategy.unwrap_or_else(|| config.screening.default_strategy.clone());
            let registry = StrategyRegistry::builtin(&config.screening);
            let screener =
                Screener::from_registry(cache_manager(&config)?, &registry, &name, config.screening.clone())?;

            let _t = utils::Timer::start(format!("Screening {} ({})", date, screener.strategy().name));
            let (results, summary) = screener.run(date).await?;

            println!("{} {} → {} / {} selected", date, summary.strategy, results.len(), summary.total);
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{:>3}. {:<8} {:<24} {:>12} {:>+7.2}%",
                    i + 1,
                    r.ticker,
                    r.name,
                    utils::fmt_number(r.close.round() as i64),
                    r.change_pct
                );
            }
        }

        Command::Warm { date } => {
            let date = date.unwrap_or_else(today);
            let _t = utils::Timer::start(format!("Cache warm-up {}", date));
            let stats = WarmUp::new(cache_manager(&config)?, config.warmup.clone()).run(date).await?;
            info!(
                "Done: {} stale of {} tickers, {} bars, {} flow rows, {} errors",
                stats.stale, stats.tickers_total, stats.bars, stats.flows, stats.errors
            );
        }

        Command::LoadCsv { dir } => {
            let _t = utils::Timer::start("CSV bulk load");
            let repo = open_repository(&config)?;
            let stats = loader::import_dir(&repo, &dir, config.cache.batch_size)?;
            info!("Done: {} files, {} bars upserted, {} errors", stats.files, stats.bars, stats.errors);
        }

        Command::Strategies => {
            let registry = StrategyRegistry::builtin(&config.screening);
            for s in registry.iter() {
                let marker = if s.name == config.screening.default_strategy { "*" } else { " " };
                println!("{} {:<20} {}", marker, s.name, s.description);
                println!("    {}", s.condition_names().join(" → "));
            }
        }

        Command::Results { date } => {
            let date = date.unwrap_or_else(today);
            let repo = open_repository(&config)?;
            let results = repo.results_for(date)?;
            match repo.summary_for(date)? {
                Some(s) => println!(
                    "{} [{}] universe {} → first filter {} → final {}  passed {}  short {}",
                    s.run_date,
                    s.strategy,
                    utils::fmt_number(s.total),
                    utils::fmt_number(s.first_filter_passed),
                    s.final_passed,
                    s.condition_passed,
                    s.data_shortage
                ),
                None => println!("No screening run stored for {}.", date),
            }
            for (i, r) in results.iter().enumerate() {
                println!("{:>3}. {:<8} {:<24} {:>+7.2}%  {}", i + 1, r.ticker, r.name, r.change_pct, r.sector);
            }
        }

        Command::Stats => {
            let repo = open_repository(&config)?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Equity Screener: Cache Stats");
            println!("─────────────────────────────────");
            println!("  Tickers  : {}", utils::fmt_number(repo.ticker_count()?));
            println!("  Bars     : {}", utils::fmt_number(repo.bar_count()?));
            println!("  Flows    : {}", utils::fmt_number(repo.flow_count()?));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("-".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("-".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
