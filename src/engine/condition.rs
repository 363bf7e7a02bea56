use crate::models::{DailyBar, Details, FinancialHistory, InvestorFlow};
use serde_json::{Value, json};

/// Everything a condition may look at for one ticker. Price history is
/// always present (possibly empty); flows and statements only in the stages
/// that load them.
#[derive(Debug, Clone, Copy)]
pub struct ConditionInput<'a> {
    pub ticker: &'a str,
    pub bars: &'a [DailyBar],
    pub flows: Option<&'a [InvestorFlow]>,
    pub financials: Option<&'a FinancialHistory>,
}

impl<'a> ConditionInput<'a> {
    pub fn new(ticker: &'a str, bars: &'a [DailyBar]) -> Self {
        Self { ticker, bars, flows: None, financials: None }
    }

    pub fn with_flows(mut self, flows: &'a [InvestorFlow]) -> Self {
        self.flows = Some(flows);
        self
    }

    pub fn with_financials(mut self, financials: &'a FinancialHistory) -> Self {
        self.financials = Some(financials);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionResult {
    pub passed: bool,
    /// Failed because the history was too short, not because a threshold was missed.
    pub shortage: bool,
    pub details: Details,
}

impl ConditionResult {
    pub fn new(passed: bool, details: Value) -> Self {
        Self { passed, shortage: false, details: into_details(details) }
    }

    pub fn shortage(reason: impl Into<String>, required: usize, available: usize) -> Self {
        Self {
            passed: false,
            shortage: true,
            details: into_details(json!({
                "data_shortage": true,
                "reason": reason.into(),
                "required": required,
                "available": available,
            })),
        }
    }
}

/// `json!` object literal into a details map; anything else becomes empty.
pub(crate) fn into_details(value: Value) -> Details {
    match value {
        Value::Object(map) => map,
        _ => Details::new(),
    }
}

/// One quantitative rule evaluated against a single ticker's history.
/// Implementations are pure: inputs are never mutated and the details map
/// carries every number the decision was made on.
pub trait ScreeningCondition: Send + Sync {
    /// Stable key used in funnel counts and stored result details.
    fn name(&self) -> &'static str;

    /// The rule in one line, for the funnel report.
    fn describe(&self) -> String;

    /// Trailing price bars needed for a full evaluation. Conditions that do
    /// not read prices return 0.
    fn required_bars(&self) -> usize {
        0
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult;

    /// A passing result's details in one line.
    fn summarize(&self, details: &Details) -> String {
        details
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortage_is_distinguishable_from_a_miss() {
        let r = ConditionResult::shortage("price history", 122, 40);
        assert!(!r.passed);
        assert!(r.shortage);
        assert_eq!(r.details["data_shortage"], json!(true));
        assert_eq!(r.details["required"], json!(122));
        assert_eq!(r.details["available"], json!(40));

        let miss = ConditionResult::new(false, json!({"close": 10.0}));
        assert!(!miss.shortage);
        assert!(!miss.details.contains_key("data_shortage"));
    }
}
