use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use super::indicators::{closes, consecutive_rises, sma};
use crate::config::TrendConfig;
use crate::models::Details;
use serde_json::{Map, Value, json};

/// Every configured SMA must have risen for at least `min_consecutive`
/// of the most recent sessions.
pub struct TrendCondition {
    config: TrendConfig,
}

impl TrendCondition {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }
}

impl ScreeningCondition for TrendCondition {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn describe(&self) -> String {
        let periods: Vec<String> = self.config.periods.iter().map(|p| p.to_string()).collect();
        format!(
            "{}d SMA rising >= {} sessions (all)",
            periods.join("/"),
            self.config.min_consecutive
        )
    }

    fn required_bars(&self) -> usize {
        self.config.periods.iter().copied().max().unwrap_or(0) + self.config.min_consecutive
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let required = self.required_bars();
        if input.bars.len() < required {
            return ConditionResult::shortage("price history", required, input.bars.len());
        }

        let closes = closes(input.bars);
        let mut windows = Map::new();
        let mut all_passed = true;
        for &period in &self.config.periods {
            let consecutive = consecutive_rises(&sma(&closes, period));
            let passed = consecutive >= self.config.min_consecutive;
            all_passed &= passed;
            windows.insert(
                period.to_string(),
                json!({ "consecutive": consecutive, "passed": passed }),
            );
        }

        ConditionResult::new(
            all_passed,
            json!({
                "min_consecutive": self.config.min_consecutive,
                "windows": Value::Object(windows),
            }),
        )
    }

    fn summarize(&self, d: &Details) -> String {
        let parts: Vec<String> = self
            .config
            .periods
            .iter()
            .map(|p| {
                let n = d
                    .get("windows")
                    .and_then(|w| w.get(p.to_string()))
                    .and_then(|w| w.get("consecutive"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                format!("{}d:{}", p, n)
            })
            .collect();
        format!("SMA rising sessions {}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{bars_ending, date};

    fn condition() -> TrendCondition {
        TrendCondition::new(TrendConfig { periods: vec![20, 60, 120], min_consecutive: 2 })
    }

    #[test]
    fn test_longest_window_rising_once_fails_overall() {
        // 20d SMA up 3 sessions, 60d up 2, 120d up 1
        let mut c = vec![100.0; 130];
        for i in [8, 67, 127, 128, 129] {
            c[i] = 101.0;
        }
        let bars = bars_ending("A", date(2026, 2, 13), &c, 50_000);

        let r = condition().evaluate(&ConditionInput::new("A", &bars));

        assert!(!r.passed);
        assert!(!r.shortage);
        let w = &r.details["windows"];
        assert_eq!(w["20"], json!({"consecutive": 3, "passed": true}));
        assert_eq!(w["60"], json!({"consecutive": 2, "passed": true}));
        assert_eq!(w["120"], json!({"consecutive": 1, "passed": false}));
    }

    #[test]
    fn test_steady_uptrend_passes() {
        let c: Vec<f64> = (0..130).map(|i| 100.0 + i as f64).collect();
        let bars = bars_ending("A", date(2026, 2, 13), &c, 50_000);
        let r = condition().evaluate(&ConditionInput::new("A", &bars));
        assert!(r.passed);
    }

    #[test]
    fn test_short_history_reports_shortage() {
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0; 121], 50_000);
        let r = condition().evaluate(&ConditionInput::new("A", &bars));
        assert!(!r.passed);
        assert!(r.shortage);
        assert_eq!(r.details["required"], json!(122));
        assert_eq!(r.details["available"], json!(121));
    }
}
