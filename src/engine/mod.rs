pub mod condition;
pub mod financial;
pub mod golden_cross;
pub mod indicators;
pub mod price;
pub mod screener;
pub mod strategy;
pub mod supply_demand;
pub mod trend;
pub mod volume;

pub use self::screener::Screener;
pub use self::strategy::StrategyRegistry;
