use super::condition::ScreeningCondition;
use super::financial::FinancialCondition;
use super::golden_cross::GoldenCrossCondition;
use super::price::PriceCondition;
use super::supply_demand::SupplyDemandCondition;
use super::trend::TrendCondition;
use super::volume::VolumeCondition;
use crate::config::ScreeningConfig;
use crate::error::ScreenerError;
use std::fmt;
use std::sync::Arc;

/// Per-ticker stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Technical,
    Supply,
    Financial,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Technical, Stage::Supply, Stage::Financial];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Technical => "technical",
            Stage::Supply => "supply",
            Stage::Financial => "financial",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named bundle of conditions for stages 2 to 4. Each list is evaluated in
/// order as a short-circuit AND; an empty list skips its stage.
pub struct Strategy {
    pub name: String,
    pub description: String,
    technical: Vec<Box<dyn ScreeningCondition>>,
    supply: Vec<Box<dyn ScreeningCondition>>,
    financial: Vec<Box<dyn ScreeningCondition>>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            technical: Vec::new(),
            supply: Vec::new(),
            financial: Vec::new(),
        }
    }

    pub fn with(mut self, stage: Stage, condition: impl ScreeningCondition + 'static) -> Self {
        let list = match stage {
            Stage::Technical => &mut self.technical,
            Stage::Supply => &mut self.supply,
            Stage::Financial => &mut self.financial,
        };
        list.push(Box::new(condition));
        self
    }

    pub fn conditions(&self, stage: Stage) -> &[Box<dyn ScreeningCondition>] {
        match stage {
            Stage::Technical => &self.technical,
            Stage::Supply => &self.supply,
            Stage::Financial => &self.financial,
        }
    }

    /// Longest price history any technical condition asks for.
    pub fn required_bars(&self) -> usize {
        self.technical.iter().map(|c| c.required_bars()).max().unwrap_or(0)
    }

    pub fn condition_names(&self) -> Vec<&'static str> {
        Stage::ALL
            .iter()
            .flat_map(|s| self.conditions(*s).iter().map(|c| c.name()))
            .collect()
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("conditions", &self.condition_names())
            .finish()
    }
}

/// Strategies by name, in registration order.
pub struct StrategyRegistry {
    strategies: Vec<Arc<Strategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    /// The built-in strategies, thresholds taken from `config`.
    pub fn builtin(config: &ScreeningConfig) -> Self {
        let price = || PriceCondition;
        let volume = || VolumeCondition::new(config.volume.clone());
        let trend = || TrendCondition::new(config.trend.clone());
        let cross = || GoldenCrossCondition::new(config.golden_cross.clone());
        let supply = || SupplyDemandCondition::new(config.supply_demand.clone());

        let mut registry = Self::empty();
        registry.register(
            Strategy::new("DEFAULT", "price + volume + trend + golden cross + supply/demand + financials")
                .with(Stage::Technical, price())
                .with(Stage::Technical, volume())
                .with(Stage::Technical, trend())
                .with(Stage::Technical, cross())
                .with(Stage::Supply, supply())
                .with(Stage::Financial, FinancialCondition),
        );
        registry.register(
            Strategy::new("VOLUME_BREAKOUT", "price + volume only")
                .with(Stage::Technical, price())
                .with(Stage::Technical, volume()),
        );
        registry.register(
            Strategy::new("GOLDEN_CROSS_SIMPLE", "price + volume + golden cross")
                .with(Stage::Technical, price())
                .with(Stage::Technical, volume())
                .with(Stage::Technical, cross()),
        );
        registry.register(
            Strategy::new("TREND_FOLLOWING", "price + volume + trend + supply/demand")
                .with(Stage::Technical, price())
                .with(Stage::Technical, volume())
                .with(Stage::Technical, trend())
                .with(Stage::Supply, supply()),
        );
        registry
    }

    /// Adds a strategy, replacing any existing one with the same name.
    pub fn register(&mut self, strategy: Strategy) {
        let strategy = Arc::new(strategy);
        match self.strategies.iter_mut().find(|s| s.name == strategy.name) {
            Some(slot) => *slot = strategy,
            None => self.strategies.push(strategy),
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Result<Arc<Strategy>, ScreenerError> {
        self.strategies
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
            .ok_or_else(|| ScreenerError::UnknownStrategy {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Strategy>> {
        self.strategies.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_in_registration_order() {
        let registry = StrategyRegistry::builtin(&ScreeningConfig::default());
        assert_eq!(
            registry.names(),
            vec!["DEFAULT", "VOLUME_BREAKOUT", "GOLDEN_CROSS_SIMPLE", "TREND_FOLLOWING"]
        );
    }

    #[test]
    fn test_default_strategy_stages() {
        let registry = StrategyRegistry::builtin(&ScreeningConfig::default());
        let s = registry.get("default").unwrap();
        assert_eq!(
            s.condition_names(),
            vec!["price", "volume", "trend", "golden_cross", "supply_demand", "financial"]
        );
        // 120d trend window + 2 rising sessions
        assert_eq!(s.required_bars(), 122);

        let breakout = registry.get("VOLUME_BREAKOUT").unwrap();
        assert!(breakout.conditions(Stage::Supply).is_empty());
        assert!(breakout.conditions(Stage::Financial).is_empty());
    }

    #[test]
    fn test_unknown_strategy_lists_available() {
        let registry = StrategyRegistry::builtin(&ScreeningConfig::default());
        let err = registry.get("MOMENTUM").unwrap_err();
        match err {
            ScreenerError::UnknownStrategy { name, available } => {
                assert_eq!(name, "MOMENTUM");
                assert_eq!(available.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = StrategyRegistry::builtin(&ScreeningConfig::default());
        registry.register(Strategy::new("DEFAULT", "price only").with(Stage::Technical, PriceCondition));
        assert_eq!(registry.names().len(), 4);
        assert_eq!(registry.get("DEFAULT").unwrap().condition_names(), vec!["price"]);
    }
}
