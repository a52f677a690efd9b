use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::{Captures, Regex};

/// YYYY-M-D and D-M-YYYY with `-`, `_` or `.` separators.
static FILE_NAME_DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?P<year>20\d{2})[-_.](?P<month>\d{1,2})[-_.](?P<day>\d{1,2})").unwrap(),
        Regex::new(r"(?P<day>\d{1,2})[-_.](?P<month>\d{1,2})[-_.](?P<year>20\d{2})").unwrap(),
    ]
});

/// Same two shapes inside report bodies, separated by `/` or `-`.
static BODY_DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<day>\d{1,2})[/-](?P<month>\d{1,2})[/-](?P<year>20\d{2})|(?P<year2>20\d{2})[/-](?P<month2>\d{1,2})[/-](?P<day2>\d{1,2})",
    )
    .unwrap()
});

/// Non-overlapping matches of `pattern` that are not embedded in a longer
/// digit run. A candidate touching other digits only moves the search on
/// by one byte, so a date written right after it is still found.
fn standalone_captures<'t>(pattern: &'t Regex, text: &'t str) -> impl Iterator<Item = Captures<'t>> + 't {
    let bytes = text.as_bytes();
    let mut start = 0;
    std::iter::from_fn(move || {
        while start < text.len() {
            let caps = pattern.captures_at(text, start)?;
            let whole = caps.get(0)?;
            let digit_before = whole.start() > 0 && bytes[whole.start() - 1].is_ascii_digit();
            let digit_after = bytes.get(whole.end()).is_some_and(u8::is_ascii_digit);
            if !digit_before && !digit_after {
                start = whole.end();
                return Some(caps);
            }
            // Matches start with an ASCII digit, so this is a char boundary.
            start = whole.start() + 1;
        }
        None
    })
}

fn calendar_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn date_from_captures(caps: &Captures<'_>) -> Option<NaiveDate> {
    if let (Some(y), Some(m), Some(d)) = (caps.name("year2"), caps.name("month2"), caps.name("day2")) {
        return calendar_date(y.as_str(), m.as_str(), d.as_str());
    }
    calendar_date(
        caps.name("year")?.as_str(),
        caps.name("month")?.as_str(),
        caps.name("day")?.as_str(),
    )
}

/// Date embedded in a file name. Each shape's first standalone match is
/// tried, in order.
pub fn date_from_file_name(file_name: &str) -> Option<NaiveDate> {
    FILE_NAME_DATE_PATTERNS
        .iter()
        .filter_map(|p| standalone_captures(p, file_name).next())
        .find_map(|caps| date_from_captures(&caps))
}

/// First real calendar date written in the body.
pub fn date_from_text(text: &str) -> Option<NaiveDate> {
    standalone_captures(&BODY_DATE_PATTERN, text).find_map(|caps| date_from_captures(&caps))
}

/// Report date: file name first, then body.
pub fn report_date(file_name: &str, text: &str) -> Option<NaiveDate> {
    date_from_file_name(file_name).or_else(|| date_from_text(text))
}

/// Calendar date of an RFC 3339 timestamp, as stored in catalog metadata.
pub fn date_of_timestamp(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(&trimmed.replace(' ', "T"))
        .ok()
        .map(|dt| dt.date_naive())
        .or_else(|| NaiveDate::parse_from_str(trimmed.get(..10)?, "%Y-%m-%d").ok())
}
