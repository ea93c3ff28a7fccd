use chrono::{Datelike, Local, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

/// Local wall-clock time. Compared at minute granularity.
pub type Timestamp = NaiveDateTime;

/// Minutes added to every interval end before overlap comparison.
pub const BUFFER_MINUTES: i64 = 15;

/// Accepted text forms for timestamps on the wire.
const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Ordering key `YYYYMMDDHHMM` derived from a timestamp.
///
/// Only ever compared, never decoded back into a date. Two timestamps within
/// the same minute produce equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeKey(i64);

impl TimeKey {
    pub fn of(ts: &Timestamp) -> Self {
        Self(
            i64::from(ts.year()) * 100_000_000
                + i64::from(ts.month()) * 1_000_000
                + i64::from(ts.day()) * 10_000
                + i64::from(ts.hour()) * 100
                + i64::from(ts.minute()),
        )
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

/// Add the fixed 15-minute buffer. Rolls over hours, days, months and years.
pub fn plus_buffer(ts: &Timestamp) -> Timestamp {
    *ts + TimeDelta::minutes(BUFFER_MINUTES)
}

pub fn local_now() -> Timestamp {
    Local::now().naive_local()
}

pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
pub(crate) fn ts(s: &str) -> Timestamp {
    parse_timestamp(s).unwrap_or_else(|| panic!("bad test timestamp: {s}"))
}
