//! Interval parsing for `--interval` and `[watch].interval`.
//!
//! Accepts the compact duration grammar operators already use for polling
//! intervals: a sequence of decimal numbers, each with an optional fraction and
//! a mandatory unit suffix, e.g. `300ms`, `1.5s`, `1m30s`, `2h45m`. A bare `0`
//! is also accepted. Units: `ns`, `us` (or `µs`/`μs`), `ms`, `s`, `m`, `h`.

#![allow(missing_docs)]

use std::time::Duration;

use crate::core::errors::{KeepnError, Result};

const NANOS_PER_UNIT: [(&str, u128); 8] = [
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 60 * 60 * 1_000_000_000),
];

/// Parse a duration string such as `1s` or `1m30s`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let invalid = |details: &str| KeepnError::InvalidDuration {
        raw: raw.to_string(),
        details: details.to_string(),
    };

    let mut rest = raw.trim();
    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }
    if rest.starts_with('-') {
        return Err(invalid("negative durations are not supported"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
                tail.split_at(frac_len)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("expected a number"));
        }

        let unit_len = after_number
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after_number.len());
        let (unit, tail) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(invalid("missing unit (use ns, us, ms, s, m, or h)"));
        }
        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid(&format!("unknown unit {unit:?}")))?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| invalid("number out of range"))?
        };
        let mut nanos = whole
            .checked_mul(scale)
            .ok_or_else(|| invalid("duration out of range"))?;

        // Fractions are accumulated digit by digit so `1.5s` stays exact.
        let mut place = scale;
        for digit in frac_part.bytes() {
            place /= 10;
            if place == 0 {
                break;
            }
            nanos += u128::from(digit - b'0') * place;
        }

        total_nanos = total_nanos
            .checked_add(nanos)
            .ok_or_else(|| invalid("duration out of range"))?;
        rest = tail;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .map_err(|_| invalid("duration out of range"))?;
    #[allow(clippy::cast_possible_truncation)]
    let subsec = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, subsec))
}

/// Render a duration in the same grammar `parse_duration` accepts.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    let nanos = duration.as_nanos();
    if nanos % 1_000_000_000 == 0 {
        let secs = duration.as_secs();
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let mut out = String::new();
        if h > 0 {
            out.push_str(&format!("{h}h"));
        }
        if m > 0 {
            out.push_str(&format!("{m}m"));
        }
        if s > 0 || out.is_empty() {
            out.push_str(&format!("{s}s"));
        }
        out
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(
            parse_duration("2h45m10.25s").unwrap(),
            Duration::from_millis(((2 * 60 + 45) * 60 + 10) * 1000 + 250)
        );
        assert_eq!(parse_duration("+3s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn bare_zero_is_accepted() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn malformed_input_is_rejected() {
        for raw in ["", "1", "s", "1x", "-1s", "1.s.", "abc", "1s2", ".s"] {
            let err = parse_duration(raw).expect_err(raw);
            assert_eq!(err.code(), "KPN-1005", "{raw}: {err}");
        }
    }

    #[test]
    fn format_matches_parse_grammar() {
        for raw in ["1s", "1m30s", "2h", "250ms", "15us", "3ns"] {
            let parsed = parse_duration(raw).unwrap();
            assert_eq!(format_duration(parsed), raw);
        }
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
