//! Fixed-width interval grid over a time range.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use hist_core::request::{interval_count, interval_nanos, validate_range};
use hist_core::{HistError, HistResult};
use std::time::Duration;

/// Half-open intervals `[start + i*step, start + (i+1)*step)`, the last one
/// truncated at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalGrid {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_ns: i64,
    count: u64,
}

impl IntervalGrid {
    /// Grid with a fixed interval width.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, interval: Duration) -> HistResult<Self> {
        let count = interval_count(start, end, interval)?;
        Ok(Self {
            start,
            end,
            step_ns: interval_nanos(interval)?,
            count,
        })
    }

    /// Grid with (at most) `intervals` equal intervals.
    ///
    /// The width is rounded up to whole nanoseconds, so very short ranges may
    /// yield fewer intervals than requested.
    pub fn with_count(start: DateTime<Utc>, end: DateTime<Utc>, intervals: u64) -> HistResult<Self> {
        validate_range(start, end)?;
        if intervals == 0 {
            return Err(HistError::InvalidRequest(
                "interval count must be positive".into(),
            ));
        }
        let span_ns = (end - start)
            .num_nanoseconds()
            .ok_or_else(|| HistError::InvalidRequest("time range is too large".into()))?
            as u64;
        let step_ns = span_ns.div_ceil(intervals).max(1);
        Ok(Self {
            start,
            end,
            step_ns: step_ns as i64,
            count: span_ns.div_ceil(step_ns),
        })
    }

    /// Number of intervals.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether the grid has no intervals (never true for a validated range).
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Range start.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Range end.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `[start, end)` of interval `index`.
    pub fn bounds(&self, index: u64) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self.start + TimeDelta::nanoseconds(self.step_ns.saturating_mul(index as i64));
        let to = self.start
            + TimeDelta::nanoseconds(self.step_ns.saturating_mul(index as i64 + 1));
        (from, to.min(self.end))
    }

    /// Interval containing `timestamp`, if `start <= timestamp < end`.
    pub fn index_of(&self, timestamp: DateTime<Utc>) -> Option<u64> {
        if timestamp < self.start || timestamp >= self.end {
            return None;
        }
        let offset = (timestamp - self.start).num_nanoseconds()?;
        Some(((offset / self.step_ns) as u64).min(self.count.saturating_sub(1)))
    }

    /// Like [`index_of`](Self::index_of) but maps `timestamp == end` to the
    /// last interval (closed range).
    pub fn index_of_closed(&self, timestamp: DateTime<Utc>) -> Option<u64> {
        if timestamp == self.end {
            return self.count.checked_sub(1);
        }
        self.index_of(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_last_interval_truncated() {
        let grid = IntervalGrid::new(t0(), t0() + TimeDelta::seconds(10), Duration::from_secs(4))
            .unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(
            grid.bounds(2),
            (t0() + TimeDelta::seconds(8), t0() + TimeDelta::seconds(10))
        );
    }

    #[test]
    fn test_index_of_half_open() {
        let grid = IntervalGrid::new(t0(), t0() + TimeDelta::seconds(6), Duration::from_secs(3))
            .unwrap();
        assert_eq!(grid.index_of(t0()), Some(0));
        assert_eq!(grid.index_of(t0() + TimeDelta::seconds(3)), Some(1));
        assert_eq!(grid.index_of(t0() + TimeDelta::seconds(6)), None);
        assert_eq!(grid.index_of_closed(t0() + TimeDelta::seconds(6)), Some(1));
        assert_eq!(grid.index_of(t0() - TimeDelta::seconds(1)), None);
    }

    #[test]
    fn test_with_count() {
        let grid = IntervalGrid::with_count(t0(), t0() + TimeDelta::seconds(100), 10).unwrap();
        assert_eq!(grid.len(), 10);
        assert_eq!(grid.bounds(9).1, t0() + TimeDelta::seconds(100));
        assert!(IntervalGrid::with_count(t0(), t0() + TimeDelta::seconds(1), 0).is_err());
    }
}
