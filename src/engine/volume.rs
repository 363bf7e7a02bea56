use super::condition::{ConditionInput, ConditionResult, ScreeningCondition};
use crate::config::VolumeConfig;
use crate::models::Details;
use serde_json::json;

/// V-1 minimum volume AND (V-2 ratio over yesterday OR V-3 above the N-day mean).
pub struct VolumeCondition {
    config: VolumeConfig,
}

impl VolumeCondition {
    pub fn new(config: VolumeConfig) -> Self {
        Self { config }
    }
}

impl ScreeningCondition for VolumeCondition {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn describe(&self) -> String {
        format!(
            "V-1(>= {}) AND (V-2(>= {}x prev) OR V-3(> {}d mean))",
            self.config.min_volume, self.config.ratio, self.config.ma_period
        )
    }

    fn required_bars(&self) -> usize {
        self.config.ma_period.max(2)
    }

    fn evaluate(&self, input: &ConditionInput<'_>) -> ConditionResult {
        let bars = input.bars;
        let [.., yesterday, today] = bars else {
            return ConditionResult::shortage("volume history", 2, bars.len());
        };

        let volume = today.volume;
        let prev_volume = yesterday.volume;
        let period = self.config.ma_period;

        let v1 = volume >= self.config.min_volume;
        let v2 = prev_volume > 0 && volume as f64 >= prev_volume as f64 * self.config.ratio;
        // too little history for the mean leg only disables that leg
        let volume_ma = (period > 0 && bars.len() >= period).then(|| {
            bars[bars.len() - period..].iter().map(|b| b.volume as f64).sum::<f64>() / period as f64
        });
        let v3 = volume_ma.is_some_and(|ma| volume as f64 > ma);

        ConditionResult::new(
            v1 && (v2 || v3),
            json!({
                "V-1": v1,
                "V-2": v2,
                "V-3": v3,
                "volume": volume,
                "prev_volume": prev_volume,
                "volume_ma": volume_ma,
                "ma_period": period,
            }),
        )
    }

    fn summarize(&self, d: &Details) -> String {
        let vol = d.get("volume").and_then(|v| v.as_i64()).unwrap_or(0);
        let prev = d.get("prev_volume").and_then(|v| v.as_i64()).unwrap_or(0);
        let ratio = if prev > 0 { vol as f64 / prev as f64 } else { 0.0 };
        let ma = d
            .get("volume_ma")
            .and_then(|v| v.as_f64())
            .map(|ma| format!("{:.0}", ma))
            .unwrap_or_else(|| "n/a".into());
        format!("volume {} ({:.1}x prev {}), mean {}", vol, ratio, prev, ma)
    }
}
