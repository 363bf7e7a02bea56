use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use crate::models::Details;
use serde_json::json;

/// P-1 close above the previous close, P-2 close above today's open.
pub struct PriceCondition;

impl ScreeningCondition for PriceCondition {
    fn name(&self) -> &'static str {
        "price"
    }

    fn describe(&self) -> String {
        "P-1(close > prev close) AND P-2(close > open)".into()
    }

    fn required_bars(&self) -> usize {
        2
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let [.., yesterday, today] = input.bars else {
            return ConditionResult::shortage("price history", 2, input.bars.len());
        };

        let p1 = today.close > yesterday.close;
        let p2 = today.close > today.open;
        ConditionResult::new(
            p1 && p2,
            json!({
                "P-1": p1,
                "P-2": p2,
                "close": today.close,
                "prev_close": yesterday.close,
                "open": today.open,
            }),
        )
    }

    fn summarize(&self, d: &Details) -> String {
        let close = d.get("close").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let prev = d.get("prev_close").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let open = d.get("open").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let chg = if prev > 0.0 { (close - prev) / prev * 100.0 } else { 0.0 };
        format!("close {:.0} > prev {:.0} ({:+.2}%), open {:.0}", close, prev, chg, open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{bars_ending, date};

    #[test]
    fn test_rising_bullish_bar_passes() {
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0, 105.0], 50_000);
        let r = PriceCondition.evaluate(&ConditionInput::new("A", &bars));
        assert!(r.passed);
        assert_eq!(r.details["prev_close"], json!(100.0));
    }

    #[test]
    fn test_equal_close_fails() {
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0, 100.0], 50_000);
        let r = PriceCondition.evaluate(&ConditionInput::new("A", &bars));
        assert!(!r.passed);
        assert_eq!(r.details["P-1"], json!(false));
        assert_eq!(r.details["P-2"], json!(true));
    }

    #[test]
    fn test_single_bar_is_shortage() {
        let bars = bars_ending("A", date(2026, 2, 13), &[100.0], 50_000);
        let r = PriceCondition.evaluate(&ConditionInput::new("A", &bars));
        assert!(r.shortage);
    }
}
