//! Destination shards and per-shard window clipping.
//!
//! Shards are time-bounded storage units assigned by the destination
//! engine. The file-write path writes one file per shard, holding every
//! series' points that fall inside the shard's window clipped to the
//! requested migration window.

pub mod catalog;
pub mod layout;

pub use catalog::{BootstrapShardCatalog, ShardCatalog, StaticShardCatalog};
pub use layout::{ShardLayout, TsmFileName};

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use crate::error::{MigrateError, Result};

/// Half-open time window `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    from: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window; `until` earlier than `from` is a configuration error.
    pub fn new(from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self> {
        if until < from {
            return Err(MigrateError::Config(format!(
                "window end {} is before start {}",
                until, from
            )));
        }
        Ok(Self { from, until })
    }

    /// Creates a window from unix seconds.
    pub fn from_unix(from: i64, until: i64) -> Result<Self> {
        let from = DateTime::from_timestamp(from, 0)
            .ok_or_else(|| MigrateError::Config(format!("timestamp {} out of range", from)))?;
        let until = DateTime::from_timestamp(until, 0)
            .ok_or_else(|| MigrateError::Config(format!("timestamp {} out of range", until)))?;
        Self::new(from, until)
    }

    /// Start of the window (inclusive).
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// End of the window (exclusive).
    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    /// Start as unix seconds.
    pub fn from_secs(&self) -> i64 {
        self.from.timestamp()
    }

    /// End as unix seconds.
    pub fn until_secs(&self) -> i64 {
        self.until.timestamp()
    }

    /// Returns true if the window contains no instant.
    pub fn is_empty(&self) -> bool {
        self.from == self.until
    }

    /// Returns true if `ts` (unix seconds) lies inside the window.
    pub fn contains_secs(&self, ts: i64) -> bool {
        ts >= self.from_secs() && ts < self.until_secs()
    }

    /// Returns true if `self` lies entirely inside `other`.
    pub fn is_within(&self, other: &TimeWindow) -> bool {
        other.from <= self.from && self.until <= other.until
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from.to_rfc3339(), self.until.to_rfc3339())
    }
}

/// Parses a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| MigrateError::Config(format!("invalid date '{}': {}", text, e)))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| MigrateError::Config(format!("invalid date '{}'", text)))
}

/// Destination shard identifier.
pub type ShardId = u64;

/// A destination shard and its time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Engine-assigned shard identifier.
    pub id: ShardId,
    /// Time window covered by the shard.
    pub window: TimeWindow,
}

impl Shard {
    /// Creates a shard.
    pub fn new(id: ShardId, window: TimeWindow) -> Self {
        Self { id, window }
    }
}

/// Clips a shard window to the requested window.
///
/// Returns `None` when the overlap is empty, in which case the shard must be
/// skipped entirely.
pub fn clip(shard: &TimeWindow, requested: &TimeWindow) -> Option<TimeWindow> {
    let from = shard.from.max(requested.from);
    let until = shard.until.min(requested.until);
    if from >= until {
        return None;
    }
    Some(TimeWindow { from, until })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(text: &str) -> DateTime<Utc> {
        parse_date(text).unwrap()
    }

    fn window(from: &str, until: &str) -> TimeWindow {
        TimeWindow::new(day(from), day(until)).unwrap()
    }

    #[test]
    fn test_clip_start_before_requested() {
        let requested = window("2020-01-01", "2020-01-03");
        let shard = window("2019-12-31", "2020-01-02");
        assert_eq!(
            clip(&shard, &requested),
            Some(window("2020-01-01", "2020-01-02"))
        );
    }

    #[test]
    fn test_clip_end_after_requested() {
        let requested = window("2020-01-01", "2020-01-03");
        let shard = window("2020-01-02", "2020-01-09");
        assert_eq!(
            clip(&shard, &requested),
            Some(window("2020-01-02", "2020-01-03"))
        );
    }

    #[test]
    fn test_clip_inside_is_unchanged() {
        let requested = window("2020-01-01", "2020-02-01");
        let shard = window("2020-01-06", "2020-01-13");
        assert_eq!(clip(&shard, &requested), Some(shard));
    }

    #[test]
    fn test_clip_outside_is_empty() {
        let requested = window("2020-01-01", "2020-01-03");
        assert_eq!(clip(&window("2019-12-01", "2019-12-08"), &requested), None);
        assert_eq!(clip(&window("2020-01-03", "2020-01-10"), &requested), None);
    }

    #[test]
    fn test_clip_touching_boundary_is_empty() {
        let requested = window("2020-01-01", "2020-01-03");
        assert_eq!(clip(&window("2019-12-25", "2020-01-01"), &requested), None);
    }

    #[test]
    fn test_empty_window() {
        let empty = window("2020-01-01", "2020-01-01");
        assert!(empty.is_empty());
        assert!(!empty.contains_secs(empty.from_secs()));
    }

    #[test]
    fn test_window_rejects_inverted_bounds() {
        assert!(TimeWindow::new(day("2020-01-02"), day("2020-01-01")).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(day("2020-01-01").timestamp(), 1_577_836_800);
        assert!(parse_date("2020-13-01").is_err());
        assert!(parse_date("01/01/2020").is_err());
    }
}
