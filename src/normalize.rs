//! Per-value cleanup applied to every raw value an extraction rule yields:
//! affix stripping, `minutes:seconds.fraction` reinterpretation, and scaling.

use crate::rules::ExtractionRule;
use crate::stats::format_number;

/// Loose numeric check: optional surrounding whitespace, sign, decimal point
/// and exponent. Rejects `inf`, `NaN` and hex.
pub fn is_numeric(value: &str) -> bool {
    parse_numeric(value).is_some()
}

pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'))
    {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reinterpret `M:SS.ff` (e.g. `06:12.32` as printed by Blender) as seconds.
///
/// Requires exactly one `:` and one `.`, with the `.` after the `:`.
pub fn parse_minutes_seconds(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.matches(':').count() != 1 || value.matches('.').count() != 1 {
        return None;
    }
    let (minutes, seconds) = value.split_once(':')?;
    if !seconds.contains('.') {
        return None;
    }
    let minutes = parse_numeric(minutes)?;
    let seconds = parse_numeric(seconds)?;
    Some(minutes * 60.0 + seconds)
}

/// Normalization settings for one extraction rule.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    pub strip_from_result: Option<String>,
    pub strip_result_postfix: Option<String>,
    pub divide_by: Option<f64>,
    pub multiply_by: Option<f64>,
    /// When set, non-numeric values are dropped after the time-format fallback.
    pub numeric: bool,
}

/// Factors that are absent, non-numeric or zero are ignored.
fn usable_factor(raw: Option<&str>) -> Option<f64> {
    raw.and_then(parse_numeric).filter(|f| *f != 0.0)
}

impl Normalizer {
    pub fn from_rule(rule: &ExtractionRule, numeric: bool) -> Self {
        Self {
            strip_from_result: rule.strip_from_result.clone().filter(|s| !s.is_empty()),
            strip_result_postfix: rule.strip_result_postfix.clone().filter(|s| !s.is_empty()),
            divide_by: usable_factor(rule.divide_by.as_deref()),
            multiply_by: usable_factor(rule.multiply_by.as_deref()),
            numeric,
        }
    }

    /// Normalize one raw value. `None` means the value is dropped.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let mut value = raw.to_string();
        if let Some(strip) = &self.strip_from_result {
            value = value.replace(strip.as_str(), "");
        }
        if let Some(postfix) = &self.strip_result_postfix {
            if let Some(stripped) = value.strip_suffix(postfix.as_str()) {
                value = stripped.to_string();
            }
        }

        let mut number = parse_numeric(&value);
        if number.is_none() && self.numeric {
            number = parse_minutes_seconds(&value);
            match number {
                Some(seconds) => value = format_number(seconds),
                None => {
                    tracing::debug!(value = %value, "dropping non-numeric result value");
                    return None;
                }
            }
        }

        let Some(mut n) = number else {
            return Some(value);
        };
        if self.divide_by.is_none() && self.multiply_by.is_none() {
            return Some(value);
        }
        if let Some(d) = self.divide_by {
            n /= d;
        }
        if let Some(m) = self.multiply_by {
            n *= m;
        }
        Some(format_number(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric() -> Normalizer {
        Normalizer {
            numeric: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("12"));
        assert!(is_numeric(" 12.5 "));
        assert!(is_numeric("-3e2"));
        assert!(!is_numeric("abc"));
        assert!(!is_numeric("inf"));
        assert!(!is_numeric("NaN"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("12ms"));
    }

    #[test]
    fn test_minutes_seconds() {
        let v = parse_minutes_seconds("6:12.32").unwrap();
        assert!((v - 372.32).abs() < 1e-9);
        assert!(parse_minutes_seconds("12.32:6").is_none());
        assert!(parse_minutes_seconds("1:2:3.4").is_none());
        assert!(parse_minutes_seconds("6:12").is_none());
    }

    #[test]
    fn test_time_format_value_is_converted() {
        let out = numeric().apply("06:12.32").unwrap();
        assert!((out.parse::<f64>().unwrap() - 372.32).abs() < 1e-9);
    }

    #[test]
    fn test_non_numeric_dropped_in_numeric_mode() {
        assert_eq!(numeric().apply("fast"), None);
    }

    #[test]
    fn test_non_numeric_kept_in_generic_mode() {
        let n = Normalizer::default();
        assert_eq!(n.apply("PASS").as_deref(), Some("PASS"));
    }

    #[test]
    fn test_strip_and_postfix() {
        let n = Normalizer {
            strip_from_result: Some("$".to_string()),
            strip_result_postfix: Some("ms".to_string()),
            numeric: true,
            ..Default::default()
        };
        assert_eq!(n.apply("$12.50ms").as_deref(), Some("12.50"));
        // Postfix only stripped from the end
        assert_eq!(n.apply("ms12"), None);
    }

    #[test]
    fn test_divide_and_multiply() {
        let n = Normalizer {
            divide_by: Some(1000.0),
            multiply_by: Some(2.0),
            numeric: true,
            ..Default::default()
        };
        assert_eq!(n.apply("5000").as_deref(), Some("10"));
    }

    #[test]
    fn test_zero_and_non_numeric_factors_ignored() {
        let rule = ExtractionRule {
            divide_by: Some("0".to_string()),
            multiply_by: Some("lots".to_string()),
            ..Default::default()
        };
        let n = Normalizer::from_rule(&rule, true);
        assert_eq!(n.divide_by, None);
        assert_eq!(n.multiply_by, None);
        assert_eq!(n.apply("42").as_deref(), Some("42"));
    }
}
