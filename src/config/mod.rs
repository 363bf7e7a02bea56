use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub warmup: WarmUpConfig,
    #[serde(default)]
    pub screening: ScreeningConfig,
}

/// Market-data gateway client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Cache manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Rows per upsert transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Calendar days a series may lag the reference date and still count as fresh.
    #[serde(default = "default_stale_tolerance_days")]
    pub stale_tolerance_days: i64,

    #[serde(default = "default_min_quarterly")]
    pub min_quarterly_periods: usize,

    #[serde(default = "default_min_annual")]
    pub min_annual_periods: usize,

    #[serde(default = "default_bar_history_days")]
    pub bar_history_days: i64,

    #[serde(default = "default_flow_history_days")]
    pub flow_history_days: i64,
}

/// Bulk warm-up configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarmUpConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Condition thresholds for the screening engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreeningConfig {
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub golden_cross: GoldenCrossConfig,
    #[serde(default)]
    pub supply_demand: SupplyDemandConfig,
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeConfig {
    #[serde(default = "default_min_volume")]
    pub min_volume: i64,
    /// Multiple of yesterday's volume that counts as a surge.
    #[serde(default = "default_volume_ratio")]
    pub ratio: f64,
    #[serde(default = "default_volume_ma_period")]
    pub ma_period: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendConfig {
    #[serde(default = "default_trend_periods")]
    pub periods: Vec<usize>,
    #[serde(default = "default_trend_min_consecutive")]
    pub min_consecutive: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoldenCrossConfig {
    #[serde(default = "default_golden_cross_periods")]
    pub periods: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupplyDemandConfig {
    #[serde(default = "default_supply_demand_periods")]
    pub periods: Vec<usize>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    300
}
fn default_jitter_ms() -> u64 {
    200
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "equity-screener/0.1 (daily screening research)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/screening.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_stale_tolerance_days() -> i64 {
    3
}
fn default_min_quarterly() -> usize {
    5
}
fn default_min_annual() -> usize {
    2
}
fn default_bar_history_days() -> i64 {
    300
}
fn default_flow_history_days() -> i64 {
    60
}
fn default_workers() -> usize {
    16
}
fn default_strategy() -> String {
    "DEFAULT".to_string()
}
fn default_min_volume() -> i64 {
    30_000
}
fn default_volume_ratio() -> f64 {
    1.5
}
fn default_volume_ma_period() -> usize {
    5
}
fn default_trend_periods() -> Vec<usize> {
    vec![20, 60, 120]
}
fn default_trend_min_consecutive() -> usize {
    2
}
fn default_golden_cross_periods() -> Vec<usize> {
    vec![3, 5, 10]
}
fn default_supply_demand_periods() -> Vec<usize> {
    vec![2, 5, 20]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            stale_tolerance_days: default_stale_tolerance_days(),
            min_quarterly_periods: default_min_quarterly(),
            min_annual_periods: default_min_annual(),
            bar_history_days: default_bar_history_days(),
            flow_history_days: default_flow_history_days(),
        }
    }
}

impl CacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            trend: TrendConfig::default(),
            golden_cross: GoldenCrossConfig::default(),
            supply_demand: SupplyDemandConfig::default(),
            default_strategy: default_strategy(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            min_volume: default_min_volume(),
            ratio: default_volume_ratio(),
            ma_period: default_volume_ma_period(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            periods: default_trend_periods(),
            min_consecutive: default_trend_min_consecutive(),
        }
    }
}

impl Default for GoldenCrossConfig {
    fn default() -> Self {
        Self {
            periods: default_golden_cross_periods(),
        }
    }
}

impl Default for SupplyDemandConfig {
    fn default() -> Self {
        Self {
            periods: default_supply_demand_periods(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("SCREENER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_screening_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.batch_size, 500);
        assert_eq!(cfg.cache.stale_tolerance_days, 3);
        assert_eq!(cfg.screening.trend.periods, vec![20, 60, 120]);
        assert_eq!(cfg.screening.golden_cross.periods, vec![3, 5, 10]);
        assert_eq!(cfg.screening.supply_demand.periods, vec![2, 5, 20]);
        assert_eq!(cfg.screening.volume.min_volume, 30_000);
        assert_eq!(cfg.warmup.workers, 16);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[screening.trend]\nmin_consecutive = 3\n\n[cache]\nbatch_size = 100\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.screening.trend.min_consecutive, 3);
        assert_eq!(cfg.screening.trend.periods, vec![20, 60, 120]);
        assert_eq!(cfg.cache.batch_size, 100);
        assert_eq!(cfg.cache.min_quarterly_periods, 5);
        assert_eq!(cfg.screening.default_strategy, "DEFAULT");
    }
}
