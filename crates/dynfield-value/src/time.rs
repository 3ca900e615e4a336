//! Time-based scalar representations
//!
//! - [`TimeLength`]: signed span in whole seconds, written as `1d2h30m15s`
//! - [`TimeRange`]: closed interval written as `start/end` (RFC 3339 on both sides)

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;

const UNITS: [(char, i64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

/// Duration in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeLength(i64);

impl TimeLength {
    /// Create from a number of seconds
    #[inline]
    #[must_use]
    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Length in seconds
    #[inline]
    #[must_use]
    pub const fn as_seconds(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimeLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }
        let mut rest = self.0.unsigned_abs();
        for (unit, size) in UNITS {
            let size = size.unsigned_abs();
            let count = rest / size;
            if count > 0 {
                write!(f, "{count}{unit}")?;
                rest -= count * size;
            }
        }
        Ok(())
    }
}

impl FromStr for TimeLength {
    type Err = String;

    /// Accepts plain seconds (`"90"`) or unit groups (`"1h30m"`, `"2d"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if body.is_empty() {
            return Err(format!("empty time length: {s:?}"));
        }

        let seconds = if body.bytes().all(|b| b.is_ascii_digit()) {
            body.parse::<i64>().map_err(|e| e.to_string())?
        } else {
            let mut total: i64 = 0;
            let mut digits = String::new();
            for c in body.chars() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    continue;
                }
                let size = UNITS
                    .iter()
                    .find(|(unit, _)| *unit == c.to_ascii_lowercase())
                    .map(|(_, size)| *size)
                    .ok_or_else(|| format!("unknown time unit {c:?} in {s:?}"))?;
                if digits.is_empty() {
                    return Err(format!("missing count before {c:?} in {s:?}"));
                }
                let count: i64 = digits.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
                total = count
                    .checked_mul(size)
                    .and_then(|v| total.checked_add(v))
                    .ok_or_else(|| format!("time length overflow: {s:?}"))?;
                digits.clear();
            }
            if !digits.is_empty() {
                return Err(format!("trailing count without unit in {s:?}"));
            }
            total
        };

        Ok(Self(if negative { -seconds } else { seconds }))
    }
}

/// Closed interval between two instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range; `start` must not be after `end`
    ///
    /// # Errors
    /// Returns a message when the bounds are reversed
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "time range starts after it ends: {} > {}",
                format_timestamp(start),
                format_timestamp(end)
            ));
        }
        Ok(Self { start, end })
    }

    /// Zero-length range at `at`
    #[inline]
    #[must_use]
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Lower bound
    #[inline]
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Upper bound
    #[inline]
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Span covered by the range
    #[must_use]
    pub fn length(&self) -> TimeLength {
        TimeLength::from_seconds((self.end - self.start).num_seconds())
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| format!("time range must be written start/end: {s:?}"))?;
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }
}

/// Parse an RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC)
///
/// # Errors
/// Returns a message when neither form matches
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("not an RFC 3339 timestamp: {text:?}"))
}

/// Canonical text form of an instant
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
