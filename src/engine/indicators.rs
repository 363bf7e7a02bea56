use crate::models::DailyBar;

pub fn closes(bars: &[DailyBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Trailing simple moving average, aligned with `values`. Entries before the
/// first full window are `None`. Each window is summed directly so equal
/// windows always compare equal.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                Some(values[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
            }
        })
        .collect()
}

/// How many of the most recent day-over-day changes are strictly positive,
/// counting back from the last value until a non-rise or a missing value.
pub fn consecutive_rises(series: &[Option<f64>]) -> usize {
    series
        .windows(2)
        .rev()
        .take_while(|w| matches!((w[0], w[1]), (Some(prev), Some(cur)) if cur > prev))
        .count()
}

/// Sum of the last `n` values, or `None` when fewer than `n` exist.
pub fn trailing_sum(values: &[f64], n: usize) -> Option<f64> {
    (values.len() >= n).then(|| values[values.len() - n..].iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_alignment() {
        let s = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(s, vec![None, None, Some(2.0), Some(3.0)]);
        assert!(sma(&[1.0], 0).iter().all(Option::is_none));
    }

    #[test]
    fn test_consecutive_rises_stops_at_flat_day() {
        let s = vec![None, Some(1.0), Some(1.0), Some(2.0), Some(3.0)];
        assert_eq!(consecutive_rises(&s), 2);
        let all_up = vec![None, Some(1.0), Some(2.0)];
        assert_eq!(consecutive_rises(&all_up), 1);
        assert_eq!(consecutive_rises(&[]), 0);
    }

    #[test]
    fn test_trailing_sum() {
        assert_eq!(trailing_sum(&[1.0, 2.0, 3.0], 2), Some(5.0));
        assert_eq!(trailing_sum(&[1.0], 2), None);
    }
}
