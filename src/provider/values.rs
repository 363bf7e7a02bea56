use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a number that may carry thousands separators or a unit suffix.
/// "1,234.56" → 1234.56 | "-3,000" → -3000.0 | "N/A" → None
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    cleaned.parse().ok()
}

/// Parse dates: ISO, compact `YYYYMMDD`, dotted or slashed.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d", "%Y%m%d", "%Y.%m.%d", "%Y/%m/%d", "%b %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

pub fn normalise_ticker(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Normalise a statement period label and detect the estimate marker.
/// Quarterly: "2025.09" → "2025/09". Annual: "2025.12(E)" → ("2025", true).
pub fn normalise_period(raw: &str, annual: bool) -> (String, bool) {
    let trimmed = raw.trim();
    let is_estimate = trimmed.contains("(E)");
    let base = trimmed.replace("(E)", "").trim().replace(['.', '-'], "/");
    if annual {
        let year = base.split('/').next().unwrap_or(&base).to_string();
        (year, is_estimate)
    } else {
        (base, is_estimate)
    }
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accepts a JSON number, a formatted string, or null.
pub fn lenient_f64<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrText>::deserialize(de)? {
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(s)) => parse_number(&s),
        None => None,
    })
}

pub fn lenient_i64<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(de)?.map(|n| n.round() as i64))
}

pub fn lenient_date<'de, D>(de: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(de)?;
    parse_date(&s).ok_or_else(|| serde::de::Error::custom(format!("unparseable date '{}'", s)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("-3,000"), Some(-3000.0));
        assert_eq!(parse_number("+12"), Some(12.0));
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let want = NaiveDate::from_ymd_opt(2026, 2, 13);
        assert_eq!(parse_date("2026-02-13"), want);
        assert_eq!(parse_date("20260213"), want);
        assert_eq!(parse_date("2026.02.13"), want);
        assert_eq!(parse_date("Feb 13, 2026"), want);
        assert_eq!(parse_date("13th Feb"), None);
    }

    #[test]
    fn test_normalise_period() {
        assert_eq!(normalise_period("2025.09", false), ("2025/09".to_string(), false));
        assert_eq!(normalise_period("2025.12(E)", true), ("2025".to_string(), true));
        assert_eq!(normalise_period(" 2024 ", true), ("2024".to_string(), false));
    }

    #[test]
    fn test_lenient_numbers_from_json() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "lenient_f64")]
            a: Option<f64>,
            #[serde(default, deserialize_with = "lenient_i64")]
            b: Option<i64>,
        }
        let r: Row = serde_json::from_str(r#"{"a": "1,500.5", "b": 42}"#).unwrap();
        assert_eq!(r.a, Some(1500.5));
        assert_eq!(r.b, Some(42));
        let r: Row = serde_json::from_str(r#"{"a": null}"#).unwrap();
        assert_eq!(r.a, None);
        assert_eq!(r.b, None);
    }
}
