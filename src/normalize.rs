//! Date and duration normalization.
//!
//! Sources publish dates and durations in whatever shape their pages happen to
//! use. Everything is converted to two canonical forms before it reaches the
//! store:
//!
//! - dates as `DD/MM/YYYY`, or [`UNKNOWN_DATE`]
//! - durations as `HH:MM:SS`, or [`ZERO_DURATION`]
//!
//! Both conversions are total. Malformed input degrades to the sentinel
//! instead of failing, so a bad date never costs us an otherwise valid record.

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::{UNKNOWN_DATE, ZERO_DURATION};

static NUMERIC_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})").expect("valid regex"));
static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

const CANONICAL_DATE: &str = "%d/%m/%Y";
const LONG_FORMS: [&str; 4] = ["%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y"];

/// The absolute date representation a source publishes.
///
/// Every variant also accepts relative expressions such as `"3 days ago"`,
/// which are tried when the absolute parse fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// Numeric day, month, year separated by `/`, `-` or `.`.
    DayMonthYear,
    /// RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS` or plain `YYYY-MM-DD`.
    Iso8601,
    /// `10 March 2025`, `10 Mar. 2025` or `March 10, 2025`.
    LongForm,
}

/// Normalize a raw date, resolving relative expressions against `now`.
pub fn normalize_date_at(raw: Option<&str>, format: DateFormat, now: DateTime<Utc>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return UNKNOWN_DATE.to_string();
    };

    let parsed = parse_absolute(raw, format).or_else(|| parse_relative(raw, now));
    match parsed {
        Some(date) => date.format(CANONICAL_DATE).to_string(),
        None => {
            debug!(raw, ?format, "Unparseable date");
            UNKNOWN_DATE.to_string()
        }
    }
}

fn parse_absolute(raw: &str, format: DateFormat) -> Option<NaiveDate> {
    match format {
        DateFormat::DayMonthYear => {
            let caps = NUMERIC_DMY.captures(raw)?;
            let day = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            let year = caps[3].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        DateFormat::Iso8601 => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.date_naive())
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                    .map(|dt| dt.date())
                    .ok()
            })
            .or_else(|| {
                raw.get(..10)
                    .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
            }),
        DateFormat::LongForm => {
            let cleaned = raw
                .replace(['.', ','], " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            LONG_FORMS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        }
    }
}

/// Resolve `"<n> <unit>s ago"`. The first unit keyword found wins, checked in
/// the order hour, minute, day, week, month.
fn parse_relative(raw: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let lower = raw.to_lowercase();
    let amount: u32 = FIRST_INTEGER.find(&lower)?.as_str().parse().ok()?;
    let amount_i64 = i64::from(amount);

    let resolved = if lower.contains("hour") {
        now.checked_sub_signed(TimeDelta::try_hours(amount_i64)?)
    } else if lower.contains("minute") {
        now.checked_sub_signed(TimeDelta::try_minutes(amount_i64)?)
    } else if lower.contains("day") {
        now.checked_sub_signed(TimeDelta::try_days(amount_i64)?)
    } else if lower.contains("week") {
        now.checked_sub_signed(TimeDelta::try_weeks(amount_i64)?)
    } else if lower.contains("month") {
        now.checked_sub_months(Months::new(amount))
    } else {
        None
    };

    resolved.map(|dt| dt.date_naive())
}

/// Normalize `mm:ss` or `hh:mm:ss` into `HH:MM:SS`.
///
/// Components are zero-padded to two digits. Two components get a `00:`
/// hour prefix, three pass through, anything else is [`ZERO_DURATION`].
pub fn normalize_duration(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return ZERO_DURATION.to_string();
    };

    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return ZERO_DURATION.to_string();
    }

    let padded: Vec<String> = parts.iter().map(|p| format!("{p:0>2}")).collect();
    match padded.as_slice() {
        [m, s] => format!("00:{m}:{s}"),
        [h, m, s] => format!("{h}:{m}:{s}"),
        _ => ZERO_DURATION.to_string(),
    }
}

/// Render a length in whole seconds as `HH:MM:SS`.
pub fn duration_from_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
