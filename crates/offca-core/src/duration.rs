//! Go-style durations (`5m`, `24h`, `1h30m`, `-90s`) and the time-or-duration
//! values accepted for certificate validity bounds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{OffcaError, Result};

const NANOS_PER_UNIT: &[(&str, i128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3600 * 1_000_000_000),
];

/// Parse a duration string such as `"5m"`, `"1h30m"` or `"-90s"`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || OffcaError::Usage(format!("invalid duration '{input}'"));

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(digits);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(invalid)?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        let whole: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(invalid)?;
        if !fraction.is_empty() {
            let digits: i128 = fraction.parse().map_err(|_| invalid())?;
            let divisor = u32::try_from(fraction.len())
                .ok()
                .and_then(|len| 10_i128.checked_pow(len))
                .ok_or_else(invalid)?;
            total = digits
                .checked_mul(scale)
                .map(|nanos| nanos / divisor)
                .and_then(|nanos| total.checked_add(nanos))
                .ok_or_else(invalid)?;
        }
        rest = tail;
    }

    if negative {
        total = -total;
    }
    let nanos = i64::try_from(total).map_err(|_| invalid())?;
    Ok(Duration::nanoseconds(nanos))
}

/// Format a duration the way [`parse_duration`] reads it, e.g. `24h0m0s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let secs = duration.num_seconds().abs();
    if secs == 0 {
        return "0s".to_string();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{sign}{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{sign}{m}m{s}s")
    } else {
        format!("{sign}{s}s")
    }
}

/// A validity bound given either as an absolute time or as an offset from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDuration {
    /// RFC 3339 timestamp
    Time(DateTime<Utc>),
    /// Offset relative to the moment the bound is resolved
    Offset(Duration),
}

impl TimeDuration {
    /// Resolve to an absolute time.
    #[must_use]
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Time(t) => *t,
            Self::Offset(d) => now + *d,
        }
    }
}

impl FromStr for TimeDuration {
    type Err = OffcaError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::Time(t.with_timezone(&Utc)));
        }
        parse_duration(s).map(Self::Offset).map_err(|_| {
            OffcaError::Usage(format!(
                "invalid time or duration '{s}': use RFC 3339 (2026-01-02T15:04:05Z) or a duration (5m, +1h, -30s)"
            ))
        })
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Offset(d) => write!(f, "{}", format_duration(*d)),
        }
    }
}

impl Serialize for TimeDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional Go-style duration strings.
pub mod serde_opt {
    use super::{format_duration, parse_duration};
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(parse_duration("-90s").unwrap(), Duration::seconds(-90));
        assert_eq!(parse_duration("+1.5h").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::zero());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "h", "5", "5d", "1h-5m", "--5m"] {
            assert!(parse_duration(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn overflowing_durations_are_errors() {
        let long_fraction = format!("0.{}1h", "0".repeat(38));
        for bad in [
            "99999999999999999999999999999999999999h",
            long_fraction.as_str(),
            "170141183460469231731687303715884105727ns",
            "3000000h",
        ] {
            let err = parse_duration(bad).unwrap_err();
            assert!(matches!(err, OffcaError::Usage(_)), "{bad}: {err}");
            assert!(err.to_string().contains("invalid duration"));
        }
    }

    #[test]
    fn format_matches_parse() {
        assert_eq!(format_duration(Duration::hours(24)), "24h0m0s");
        assert_eq!(format_duration(Duration::minutes(5)), "5m0s");
        assert_eq!(format_duration(Duration::seconds(-30)), "-30s");
        let d = Duration::seconds(3725);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }

    #[test]
    fn time_duration_accepts_both_forms() {
        let now = Utc::now();
        let offset: TimeDuration = "1h".parse().unwrap();
        assert_eq!(offset.resolve(now), now + Duration::hours(1));

        let fixed: TimeDuration = "2030-01-02T03:04:05Z".parse().unwrap();
        assert_eq!(fixed.resolve(now).to_rfc3339(), "2030-01-02T03:04:05+00:00");

        assert!("tomorrow".parse::<TimeDuration>().is_err());
    }
}
