use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use super::indicators::{closes, sma};
use crate::config::GoldenCrossConfig;
use crate::models::Details;
use serde_json::{Map, Value, json};

/// Close crosses up through at least one short SMA: at or below it
/// yesterday, strictly above it today.
pub struct GoldenCrossCondition {
    config: GoldenCrossConfig,
}

impl GoldenCrossCondition {
    pub fn new(config: GoldenCrossConfig) -> Self {
        Self { config }
    }
}

impl ScreeningCondition for GoldenCrossCondition {
    fn name(&self) -> &'static str {
        "golden_cross"
    }

    fn describe(&self) -> String {
        let periods: Vec<String> = self.config.periods.iter().map(|p| p.to_string()).collect();
        format!("close crosses above {}d SMA (any)", periods.join("/"))
    }

    fn required_bars(&self) -> usize {
        self.config.periods.iter().copied().max().unwrap_or(0) + 2
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let required = self.required_bars();
        if input.bars.len() < required {
            return ConditionResult::shortage("price history", required, input.bars.len());
        }

        let closes = closes(input.bars);
        let n = closes.len();
        let (close_yesterday, close_today) = (closes[n - 2], closes[n - 1]);

        let mut windows = Map::new();
        let mut any_passed = false;
        for &period in &self.config.periods {
            let averages = sma(&closes, period);
            let (Some(sma_yesterday), Some(sma_today)) = (averages[n - 2], averages[n - 1]) else {
                continue;
            };

            let below_yesterday = close_yesterday <= sma_yesterday;
            let above_today = close_today > sma_today;
            let passed = below_yesterday && above_today;
            any_passed |= passed;

            let mut window = json!({
                "below_yesterday": below_yesterday,
                "above_today": above_today,
                "passed": passed,
                "sma_today": sma_today,
            });
            if !above_today {
                window["reason"] = json!("not yet crossed");
            } else if !below_yesterday {
                window["reason"] = json!("already above");
            }
            windows.insert(period.to_string(), window);
        }

        ConditionResult::new(any_passed, json!({ "windows": Value::Object(windows) }))
    }

    fn summarize(&self, d: &Details) -> String {
        let crossed: Vec<String> = self
            .config
            .periods
            .iter()
            .filter(|p| {
                d.get("windows")
                    .and_then(|w| w.get(p.to_string()))
                    .and_then(|w| w.get("passed"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .map(|p| format!("{}d", p))
            .collect();
        format!("crossed above {} SMA", crossed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{bars_ending, date};

    fn condition() -> GoldenCrossCondition {
        GoldenCrossCondition::new(GoldenCrossConfig { periods: vec![3, 5, 10] })
    }

    #[test]
    fn test_single_window_crossing_passes() {
        let closes = [130.0, 130.0, 130.0, 130.0, 130.0, 130.0, 130.0, 110.0, 110.0, 90.0, 90.0, 100.0, 105.0];
        let bars = bars_ending("A", date(2026, 2, 13), &closes, 50_000);

        let r = condition().evaluate(&ConditionInput::new("A", &bars));

        assert!(r.passed);
        let w = &r.details["windows"];
        assert_eq!(w["5"]["passed"], json!(true));
        assert_eq!(w["3"]["passed"], json!(false));
        assert_eq!(w["3"]["reason"], json!("already above"));
        assert_eq!(w["10"]["passed"], json!(false));
        assert_eq!(w["10"]["reason"], json!("not yet crossed"));
    }

    #[test]
    fn test_touching_average_today_is_not_a_cross() {
        // flat series: at the average yesterday and today
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0; 13], 50_000);
        let r = condition().evaluate(&ConditionInput::new("A", &bars));
        assert!(!r.passed);
        assert_eq!(r.details["windows"]["5"]["below_yesterday"], json!(true));
        assert_eq!(r.details["windows"]["5"]["reason"], json!("not yet crossed"));
    }

    #[test]
    fn test_needs_longest_window_plus_two() {
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0; 11], 50_000);
        let r = condition().evaluate(&ConditionInput::new("A", &bars));
        assert!(r.shortage);
        assert_eq!(r.details["required"], json!(12));
    }
}
