use chrono::NaiveDate;
use thiserror::Error;

/// Typed failures of the screening core.
///
/// These travel inside `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScreenerError {
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("strategy '{name}' not found (available: {})", available.join(", "))]
    UnknownStrategy { name: String, available: Vec<String> },

    #[error("{operation} for {ticker} failed: {reason}")]
    ProviderUnavailable {
        operation: &'static str,
        ticker: String,
        reason: String,
    },

    #[error("{operation} for {ticker} timed out after {secs}s")]
    Timeout {
        operation: &'static str,
        ticker: String,
        secs: u64,
    },
}

impl ScreenerError {
    pub fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), ScreenerError> {
        if end < start {
            return Err(ScreenerError::InvalidRange { start, end });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy_lists_names() {
        let err = ScreenerError::UnknownStrategy {
            name: "NOPE".into(),
            available: vec!["DEFAULT".into(), "VOLUME_BREAKOUT".into()],
        };
        assert_eq!(
            err.to_string(),
            "strategy 'NOPE' not found (available: DEFAULT, VOLUME_BREAKOUT)"
        );
    }

    #[test]
    fn test_check_range() {
        let a = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 1, 9).unwrap();
        assert!(ScreenerError::check_range(a, b).is_ok());
        assert!(ScreenerError::check_range(a, a).is_ok());
        assert_eq!(
            ScreenerError::check_range(b, a),
            Err(ScreenerError::InvalidRange { start: b, end: a })
        );
    }
}
