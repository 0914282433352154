//! Loose date/time resolution for job drafts.
//!
//! LLM drafts carry a date string and an optional spoken-style time string
//! ("2pm", "9:30 AM"). The resolver turns them into a wall-clock timestamp in
//! the business's local time, or `None` when the date cannot be read.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

/// Date formats tried in order, after RFC 3339 and naive date-times
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

fn time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*([ap]\.?m\.?)?$").expect("valid time regex")
    })
}

/// Resolves `(date, time)` pairs into a timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeResolver;

impl DateTimeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a date string plus optional time string.
    ///
    /// - missing or unparsable date → `None`
    /// - a time matching `H(:MM)? (AM|PM)?` overrides hours and minutes
    /// - a time that does not match is ignored
    pub fn resolve(&self, date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
        let date = date.map(str::trim).filter(|d| !d.is_empty())?;
        let base = parse_date(date)?;

        match time.and_then(parse_time) {
            Some(t) => Some(base.date().and_time(t)),
            None => Some(base),
        }
    }
}

/// Parse a calendar date; date-time inputs keep their time of day
fn parse_date(input: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(dt);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a time of day with 12h → 24h conversion.
///
/// `12 AM` is midnight, `12 PM` is noon, other PM hours add twelve.
fn parse_time(input: &str) -> Option<NaiveTime> {
    let caps = time_pattern().captures(input.trim())?;

    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    let hour = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(meridiem) => {
            if hour == 0 || hour > 12 {
                return None;
            }
            let pm = meridiem.starts_with('p');
            match (pm, hour) {
                (false, 12) => 0,
                (true, 12) => 12,
                (true, h) => h + 12,
                (false, h) => h,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
