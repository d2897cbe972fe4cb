use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Handles the timestamp formats used by sacct and by the `--since`/`--until` options
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a Start/End field such as `2023-04-01T12:30:00`.
    /// `Unknown`, `None` and empty fields have no timestamp.
    pub fn parse_sacct(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        if matches!(text, "" | "Unknown" | "None") {
            return None;
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok()
    }

    /// Parse a time window bound, either absolute or relative to `now`.
    ///
    /// Relative bounds are comma separated `unit=amount` pairs, e.g. `d=2,h=1`
    /// means two days and one hour before `now`.
    pub fn parse_bound(text: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
        let text = text.trim();
        if text.contains('=') {
            return Self::parse_relative(text, now);
        }

        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(parsed);
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(midnight);
            }
        }

        anyhow::bail!("Failed to parse time bound: {}", text)
    }

    /// Subtract `w=`, `d=`, `h=`, `m=` amounts (or full unit names) from `now`.
    /// Unknown units and non-numeric amounts are ignored; amounts that leave
    /// the calendar range are an error.
    pub fn parse_relative(text: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
        let mut offset = Duration::zero();

        for arg in text.split(',') {
            let Some((unit, amount)) = arg.split_once('=') else {
                continue;
            };
            let Ok(amount) = amount.trim().parse::<i64>() else {
                continue;
            };
            let delta = match unit.trim().to_lowercase().as_str() {
                "w" | "weeks" => Duration::try_weeks(amount),
                "d" | "days" => Duration::try_days(amount),
                "h" | "hours" => Duration::try_hours(amount),
                "m" | "minutes" => Duration::try_minutes(amount),
                _ => continue,
            };
            offset = delta
                .and_then(|delta| offset.checked_add(&delta))
                .with_context(|| format!("Time offset out of range: {}", text))?;
        }

        now.checked_sub_signed(offset)
            .with_context(|| format!("Time offset out of range: {}", text))
    }

    /// Resolve a `--since`/`--until` value into the text handed to sacct and,
    /// when it could be understood here, the instant it names. Formats only
    /// sacct understands (such as `MMDDYY`) are passed through untouched.
    pub fn resolve_bound(text: &str, now: NaiveDateTime) -> (String, Option<NaiveDateTime>) {
        match Self::parse_bound(text, now) {
            Ok(bound) => (Self::to_sacct_arg(&bound), Some(bound)),
            Err(_) => (text.trim().to_string(), None),
        }
    }

    /// Format a bound the way sacct accepts it for `--starttime`/`--endtime`.
    pub fn to_sacct_arg(timestamp: &NaiveDateTime) -> String {
        timestamp.format("%Y-%m-%dT%H:%M").to_string()
    }
}
