//! Rate-limit period strings.
//!
//! A period is a positive integer followed by a unit: `s`, `m`, `h` or `d`.

use std::time::Duration;

use crate::ConfigError;

/// Parses a period string such as `"1s"`, `"15m"`, `"1h"` or `"1d"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the string is malformed or the
/// period is zero.
///
/// # Example
///
/// ```
/// use sluice_config::parse_period;
/// use std::time::Duration;
///
/// assert_eq!(parse_period("15m").unwrap(), Duration::from_secs(900));
/// assert!(parse_period("0s").is_err());
/// ```
pub fn parse_period(period: &str) -> Result<Duration, ConfigError> {
    let period = period.trim();
    let invalid = |reason: &str| ConfigError::invalid_value("period", format!("{period:?}: {reason}"));

    let Some(unit) = period.chars().last() else {
        return Err(invalid("empty period"));
    };
    let digits = &period[..period.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected <number><s|m|h|d>"));
    }
    let count: u64 = digits
        .parse()
        .map_err(|_| invalid("number out of range"))?;
    if count == 0 {
        return Err(invalid("period must be positive"));
    }

    let unit_secs = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return Err(invalid("unit must be one of s, m, h, d")),
    };

    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid("number out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_period("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_period("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_period("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_period("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(parse_period(" 30S ").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "s", "10", "1w", "-1s", "1.5m", "m1", "ten s"] {
            assert!(parse_period(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_zero() {
        let err = parse_period("0m").unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_rejects_overflow() {
        assert!(parse_period("99999999999999999999d").is_err());
        assert!(parse_period("999999999999999999d").is_err());
    }
}
