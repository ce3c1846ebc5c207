//! Time-of-day parsing and the sort/overlap/uniqueness validation that
//! turns a raw `Vec<TimeWindowConfig>` into an ordered, non-overlapping
//! table. Grounded on the source system's `time_str_to_short` and
//! `validate_time_windows`: encode `HH:MM` as `hour*100+minute`, sort by
//! start, then walk adjacent pairs rejecting both overlap and adjacency.

use super::types::TimeWindowConfig;
use crate::error::RelayError;
use std::collections::HashSet;

/// A window after parsing and validation, before its rate limiter has been
/// constructed — `crate::scheduler` attaches the limiter instance.
#[derive(Debug, Clone)]
pub struct ValidatedWindow {
    pub id: String,
    pub start: u16,
    pub end: u16,
    pub enabled: bool,
    pub rate_limiter_type: String,
    pub rate_limiter_config: Option<String>,
}

/// Parse `"HH:MM"` into `hour*100 + minute`. Requires exactly two digits on
/// each side of the colon (`"9:5"` is rejected, not silently widened),
/// matching the original `time_str_to_short`'s `length()==5 && [2]==':'`
/// strictness.
pub fn parse_time(s: &str) -> Result<u16, RelayError> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == 5
        && bytes[2] == b':'
        && bytes[0..2].iter().all(u8::is_ascii_digit)
        && bytes[3..5].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return Err(RelayError::config(format!(
            "invalid time '{}', expected HH:MM",
            s
        )));
    }

    let (hh, mm) = s.split_at(2);
    let mm = &mm[1..];

    let hour: u16 = hh
        .parse()
        .map_err(|_| RelayError::config(format!("invalid hour in '{}'", s)))?;
    let minute: u16 = mm
        .parse()
        .map_err(|_| RelayError::config(format!("invalid minute in '{}'", s)))?;

    if hour > 23 {
        return Err(RelayError::config(format!("hour out of range in '{}'", s)));
    }
    if minute > 59 {
        return Err(RelayError::config(format!(
            "minute out of range in '{}'",
            s
        )));
    }

    Ok(hour * 100 + minute)
}

/// Sort, validate, and return the window table. Rejects:
/// - `start >= end` for any single window,
/// - duplicate ids,
/// - overlapping or adjacent windows (`next.start <= prev.end`).
pub fn validate_time_windows(
    windows: &[TimeWindowConfig],
) -> Result<Vec<ValidatedWindow>, RelayError> {
    let mut parsed = Vec::with_capacity(windows.len());
    let mut seen_ids = HashSet::new();

    for w in windows {
        let id = w.id.as_str();
        if !seen_ids.insert(id.clone()) {
            return Err(RelayError::config(format!("duplicate window id '{}'", id)));
        }

        let start = parse_time(&w.start)?;
        let end = parse_time(&w.end)?;
        if start >= end {
            return Err(RelayError::config(format!(
                "window '{}': start {} must be before end {}",
                id, w.start, w.end
            )));
        }

        parsed.push(ValidatedWindow {
            id,
            start,
            end,
            enabled: w.enable,
            rate_limiter_type: w.rate_limiter_type.clone(),
            rate_limiter_config: w.rate_limiter_config.clone(),
        });
    }

    parsed.sort_by_key(|w| w.start);

    for pair in parsed.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start <= prev.end {
            return Err(RelayError::config(format!(
                "window '{}' overlaps or is adjacent to window '{}'",
                next.id, prev.id
            )));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::WindowId;

    fn window(id: &str, start: &str, end: &str, enable: bool) -> TimeWindowConfig {
        TimeWindowConfig {
            id: WindowId::Text(id.to_string()),
            start: start.to_string(),
            end: end.to_string(),
            enable,
            rate_limiter_type: "local".to_string(),
            rate_limiter_config: None,
        }
    }

    #[test]
    fn parse_time_basic() {
        assert_eq!(parse_time("05:30").unwrap(), 530);
        assert_eq!(parse_time("00:00").unwrap(), 0);
        assert_eq!(parse_time("23:59").unwrap(), 2359);
    }

    #[test]
    fn parse_time_rejects_out_of_range() {
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("10:60").is_err());
        assert!(parse_time("garbage").is_err());
    }

    #[test]
    fn parse_time_rejects_non_two_digit_components() {
        assert!(parse_time("9:05").is_err());
        assert!(parse_time("09:5").is_err());
        assert!(parse_time("9:5").is_err());
        assert!(parse_time("009:05").is_err());
        assert!(parse_time("09:005").is_err());
    }

    #[test]
    fn sorts_non_overlapping_windows() {
        let windows = vec![
            window("b", "12:00", "13:00", true),
            window("a", "09:00", "10:00", true),
        ];
        let validated = validate_time_windows(&windows).unwrap();
        assert_eq!(validated[0].id, "a");
        assert_eq!(validated[1].id, "b");
    }

    #[test]
    fn rejects_overlap() {
        let windows = vec![
            window("a", "09:00", "11:00", true),
            window("b", "10:00", "12:00", true),
        ];
        assert!(validate_time_windows(&windows).is_err());
    }

    #[test]
    fn rejects_adjacency() {
        let windows = vec![
            window("a", "09:00", "10:00", true),
            window("b", "10:00", "11:00", true),
        ];
        assert!(validate_time_windows(&windows).is_err());
    }

    #[test]
    fn rejects_start_after_end() {
        let windows = vec![window("a", "10:00", "09:00", true)];
        assert!(validate_time_windows(&windows).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let windows = vec![
            window("a", "09:00", "10:00", true),
            window("a", "11:00", "12:00", true),
        ];
        assert!(validate_time_windows(&windows).is_err());
    }

    #[test]
    fn accepts_tight_boundary_window() {
        let windows = vec![window("a", "00:00", "00:01", true)];
        let validated = validate_time_windows(&windows).unwrap();
        assert_eq!(validated[0].start, 0);
        assert_eq!(validated[0].end, 1);
    }

    #[test]
    fn accepts_non_adjacent_gap() {
        let windows = vec![
            window("a", "09:00", "10:00", true),
            window("b", "10:01", "11:00", true),
        ];
        assert!(validate_time_windows(&windows).is_ok());
    }
}
