// Utility helpers for parsing and basic statistics.
//
// This module centralizes the "dirty" CSV cell handling so the stages can
// assume clean, typed values.
use chrono::NaiveDateTime;
use num_format::{Locale, ToFormattedString};

/// Timestamp layout of the `created_at`/`updated_at` columns of every source.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Trim a cell and map empty strings to `None`.
pub fn non_empty(s: Option<&str>) -> Option<&str> {
    let s = s?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports.
///
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = non_empty(s)?;
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an optional timestamp cell.
///
/// `Ok(None)` for an empty cell, `Err(raw)` for a non-empty cell that does not
/// match [`TIMESTAMP_FORMAT`] so the caller can raise a parse fault with context.
pub fn parse_timestamp(s: Option<&str>) -> Result<Option<NaiveDateTime>, String> {
    let Some(s) = non_empty(s) else {
        return Ok(None);
    };
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(Some)
        .map_err(|_| s.to_string())
}

/// `t`/`f` flags as exported by the source database.
pub fn parse_bool(s: Option<&str>) -> Option<bool> {
    match non_empty(s)?.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" => Some(true),
        "f" | "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn average(v: &[f64]) -> Option<f64> {
    // Arithmetic mean; `None` for an empty slice instead of NaN.
    if v.is_empty() {
        return None;
    }
    let sum: f64 = v.iter().copied().sum();
    Some(sum / v.len() as f64)
}

/// Mean over the present values only, `None` if nothing is present.
pub fn average_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    average(&present)
}

pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimals plus locale-aware thousands separators (`1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_val: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = parts.next() {
        res.push('.');
        res.push_str(frac);
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Used for counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prices_and_rejects_text() {
        assert_eq!(parse_f64_safe(Some(" 3.5 ")), Some(3.5));
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(Some("n/a")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn timestamps_with_and_without_fraction() {
        let ts = parse_timestamp(Some("2012-10-04 12:00:01.123456")).unwrap().unwrap();
        assert_eq!(ts.format("%Y").to_string(), "2012");
        assert!(parse_timestamp(Some("2012-10-04 12:00:01")).unwrap().is_some());
        assert_eq!(parse_timestamp(Some("  ")), Ok(None));
        assert_eq!(parse_timestamp(Some("04.10.2012")), Err("04.10.2012".to_string()));
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool(Some("t")), Some(true));
        assert_eq!(parse_bool(Some("F")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
    }

    #[test]
    fn averages_skip_missing_values() {
        assert_eq!(average(&[]), None);
        assert_eq!(average_present([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(average_present([None, None]), None);
    }

    #[test]
    fn formats_with_separators() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-12.5, 1), "-12.5");
        assert_eq!(format_int(9855), "9,855");
    }
}
