use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use crate::models::{Details, FinancialPeriod};
use serde_json::{Value, json};

const YOY_QUARTERS: usize = 5;

/// Outcome of one F-check.
enum Check {
    Insufficient { series: &'static str, required: usize, available: usize },
    Evaluated { passed: bool, evidence: Value },
}

impl Check {
    fn passed(&self) -> bool {
        matches!(self, Check::Evaluated { passed: true, .. })
    }

    fn to_value(&self) -> Value {
        match self {
            Check::Insufficient { series, required, available } => json!({
                "passed": false,
                "insufficient": true,
                "reason": format!("{} periods {} < {}", series, available, required),
                "required": required,
                "available": available,
            }),
            Check::Evaluated { passed, evidence } => {
                let mut v = evidence.clone();
                v["passed"] = json!(passed);
                v
            }
        }
    }
}

fn operating_income(periods: &[FinancialPeriod], back: usize) -> f64 {
    periods[periods.len() - 1 - back].operating_income
}

/// Latest value strictly above the one `back` periods earlier.
fn growth(periods: &[FinancialPeriod], back: usize, series: &'static str) -> Check {
    if periods.len() < back + 1 {
        return Check::Insufficient { series, required: back + 1, available: periods.len() };
    }
    let latest = operating_income(periods, 0);
    let earlier = operating_income(periods, back);
    Check::Evaluated {
        passed: latest > earlier,
        evidence: json!({ "latest": latest, "compared": earlier }),
    }
}

/// Fails only when a profitable period is followed by a loss. A loss after
/// a loss is not a turn to deficit.
fn no_deficit_turn(periods: &[FinancialPeriod], series: &'static str) -> Check {
    if periods.len() < 2 {
        return Check::Insufficient { series, required: 2, available: periods.len() };
    }
    let current = operating_income(periods, 0);
    let previous = operating_income(periods, 1);
    let deficit_turn = previous > 0.0 && current < 0.0;
    Check::Evaluated {
        passed: !deficit_turn,
        evidence: json!({ "current": current, "previous": previous, "deficit_turn": deficit_turn }),
    }
}

/// Operating income rules over the statement history:
/// F-1 YoY growth, F-2 QoQ growth, F-3 no annual turn to deficit,
/// F-4 no quarterly turn to deficit. All four must pass.
pub struct FinancialCondition;

impl ScreeningCondition for FinancialCondition {
    fn name(&self) -> &'static str {
        "financial"
    }

    fn describe(&self) -> String {
        "F-1(YoY up) AND F-2(QoQ up) AND F-3(no annual deficit turn) AND F-4(no quarterly deficit turn)".into()
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let Some(history) = input.financials.filter(|h| !h.is_empty()) else {
            return ConditionResult::shortage("financial statements", YOY_QUARTERS, 0);
        };

        let checks = [
            ("F-1", growth(&history.quarterly, YOY_QUARTERS - 1, "quarterly")),
            ("F-2", growth(&history.quarterly, 1, "quarterly")),
            ("F-3", no_deficit_turn(&history.annual, "annual")),
            ("F-4", no_deficit_turn(&history.quarterly, "quarterly")),
        ];

        let mut details = Details::new();
        for (key, check) in &checks {
            details.insert((*key).to_string(), check.to_value());
        }
        ConditionResult {
            passed: checks.iter().all(|(_, c)| c.passed()),
            shortage: checks.iter().any(|(_, c)| matches!(c, Check::Insufficient { .. })),
            details,
        }
    }

    fn summarize(&self, d: &Details) -> String {
        let field = |key: &str, name: &str| {
            d.get(key)
                .and_then(|v| v.get(name))
                .and_then(Value::as_f64)
                .map(|n| format!("{:.0}", n))
                .unwrap_or_else(|| "-".into())
        };
        format!(
            "OI YoY {} -> {}, QoQ {} -> {}, annual {} -> {}",
            field("F-1", "compared"),
            field("F-1", "latest"),
            field("F-2", "compared"),
            field("F-2", "latest"),
            field("F-3", "previous"),
            field("F-3", "current"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyBar, FinancialHistory, Frequency};

    fn series(values: &[f64], frequency: Frequency) -> Vec<FinancialPeriod> {
        values
            .iter()
            .enumerate()
            .map(|(i, &oi)| FinancialPeriod {
                ticker: "A".into(),
                period: match frequency {
                    Frequency::Quarterly => format!("2024/{:02}", i + 1),
                    Frequency::Annual => format!("{}", 2020 + i),
                },
                frequency,
                revenue: 100.0,
                operating_income: oi,
                net_income: oi,
                is_estimate: false,
            })
            .collect()
    }

    fn evaluate(quarterly: &[f64], annual: &[f64]) -> ConditionResult {
        let history = FinancialHistory {
            quarterly: series(quarterly, Frequency::Quarterly),
            annual: series(annual, Frequency::Annual),
        };
        let bars: Vec<DailyBar> = Vec::new();
        FinancialCondition.evaluate(&ConditionInput::new("A", &bars).with_financials(&history))
    }

    #[test]
    fn test_loss_after_loss_is_not_a_deficit_turn() {
        let r = evaluate(&[1.0, 2.0, 3.0, 4.0, 5.0], &[-10.0, -5.0]);
        assert!(r.passed);
        assert_eq!(r.details["F-3"]["deficit_turn"], json!(false));
        assert_eq!(r.details["F-3"]["passed"], json!(true));
    }

    #[test]
    fn test_annual_turn_to_deficit_fails() {
        let r = evaluate(&[1.0, 2.0, 3.0, 4.0, 5.0], &[10.0, -1.0]);
        assert!(!r.passed);
        assert!(!r.shortage);
        assert_eq!(r.details["F-3"]["deficit_turn"], json!(true));
    }

    #[test]
    fn test_flat_quarter_fails_growth() {
        let r = evaluate(&[1.0, 2.0, 3.0, 5.0, 5.0], &[1.0, 2.0]);
        assert!(!r.passed);
        assert_eq!(r.details["F-1"]["passed"], json!(true));
        assert_eq!(r.details["F-2"]["passed"], json!(false));
    }

    #[test]
    fn test_four_quarters_marks_yoy_insufficient() {
        let r = evaluate(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0]);
        assert!(!r.passed);
        assert!(r.shortage);
        assert_eq!(r.details["F-1"]["insufficient"], json!(true));
        assert_eq!(r.details["F-1"]["available"], json!(4));
        // the other checks still report a real verdict
        assert_eq!(r.details["F-2"]["passed"], json!(true));
        assert!(r.details["F-2"].get("insufficient").is_none());
    }

    #[test]
    fn test_no_statements_is_shortage() {
        let r = evaluate(&[], &[]);
        assert!(r.shortage);
        assert_eq!(r.details["data_shortage"], json!(true));
    }
}
