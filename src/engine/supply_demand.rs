use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use super::indicators::trailing_sum;
use crate::config::SupplyDemandConfig;
use crate::models::{Details, InvestorFlow};
use serde_json::{Map, Value, json};

/// S-1 program net buying positive over every lookback, OR S-2 foreign and
/// institution net buying both positive over every lookback.
///
/// `program_net_buy` is usually the foreign + institution approximation made
/// by the provider, so S-1 and S-2 are close to each other in practice.
pub struct SupplyDemandCondition {
    config: SupplyDemandConfig,
}

impl SupplyDemandCondition {
    pub fn new(config: SupplyDemandConfig) -> Self {
        Self { config }
    }

    /// Per-period sums; a period longer than the history counts as not positive.
    fn net_buying(&self, flows: &[InvestorFlow], column: fn(&InvestorFlow) -> f64) -> (bool, Value) {
        let values: Vec<f64> = flows.iter().map(column).collect();
        let mut sums = Map::new();
        let mut all_positive = true;
        for &period in &self.config.periods {
            let total = trailing_sum(&values, period);
            all_positive &= total.is_some_and(|t| t > 0.0);
            sums.insert(period.to_string(), json!(total));
        }
        (all_positive, Value::Object(sums))
    }
}

impl ScreeningCondition for SupplyDemandCondition {
    fn name(&self) -> &'static str {
        "supply_demand"
    }

    fn describe(&self) -> String {
        let periods: Vec<String> = self.config.periods.iter().map(|p| p.to_string()).collect();
        format!(
            "S-1(program net buy > 0) OR S-2(foreign AND institution > 0) over {}d",
            periods.join("/")
        )
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let flows = match input.flows {
            Some(flows) if !flows.is_empty() => flows,
            _ => {
                let longest = self.config.periods.iter().copied().max().unwrap_or(1);
                return ConditionResult::shortage("investor flows", longest, 0);
            }
        };

        let (s1, program) = self.net_buying(flows, |f| f.program_net_buy);
        let (foreign_ok, foreign) = self.net_buying(flows, |f| f.foreign);
        let (institution_ok, institution) = self.net_buying(flows, |f| f.institution);
        let s2 = foreign_ok && institution_ok;

        ConditionResult::new(
            s1 || s2,
            json!({
                "S-1": s1,
                "S-2": s2,
                "S-2_foreign": foreign_ok,
                "S-2_institution": institution_ok,
                "program": program,
                "foreign": foreign,
                "institution": institution,
            }),
        )
    }

    fn summarize(&self, d: &Details) -> String {
        let sums = |key: &str| -> String {
            self.config
                .periods
                .iter()
                .map(|p| {
                    d.get(key)
                        .and_then(|v| v.get(p.to_string()))
                        .and_then(Value::as_f64)
                        .map(|s| format!("{}d {:+.0}", p, s))
                        .unwrap_or_else(|| format!("{}d n/a", p))
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "program [{}] foreign [{}] institution [{}]",
            sums("program"),
            sums("foreign"),
            sums("institution")
        )
    }
}
