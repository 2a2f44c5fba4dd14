//! Raw-query range trimming.
//!
//! `Inside` keeps samples with `start <= t <= end`. `Outside` additionally
//! keeps the latest sample before `start` and the first sample after `end`.
//! The per-tag limit counts every emitted sample, bracketing ones included.

use chrono::{DateTime, Utc};
use hist_core::{BoundaryType, Sample};
use tracing::debug;

/// Streaming boundary filter for one tag.
#[derive(Debug)]
pub struct BoundaryFilter {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    boundary: BoundaryType,
    limit: usize,
    emitted: usize,
    held_before: Option<Sample>,
    last_timestamp: Option<DateTime<Utc>>,
    done: bool,
}

impl BoundaryFilter {
    /// Filter for `[start, end]` with `limit` samples at most (0 = unlimited).
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, boundary: BoundaryType, limit: usize) -> Self {
        Self {
            start,
            end,
            boundary,
            limit,
            emitted: 0,
            held_before: None,
            last_timestamp: None,
            done: false,
        }
    }

    /// Whether no further sample can be emitted.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Offer the next raw sample, returning the samples now ready to emit.
    pub fn offer(&mut self, sample: Sample) -> Vec<Sample> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if self.last_timestamp.is_some_and(|last| sample.timestamp < last) {
            debug!(timestamp = %sample.timestamp, "Dropping out-of-order raw sample");
            return out;
        }
        self.last_timestamp = Some(sample.timestamp);

        if sample.timestamp < self.start {
            if self.boundary == BoundaryType::Outside {
                self.held_before = Some(sample);
            }
            return out;
        }

        self.flush_held(&mut out);
        if sample.timestamp <= self.end {
            self.push(sample, &mut out);
        } else {
            if self.boundary == BoundaryType::Outside {
                self.push(sample, &mut out);
            }
            self.done = true;
        }
        out
    }

    /// Samples still held at end of input.
    pub fn finish(&mut self) -> Vec<Sample> {
        let mut out = Vec::new();
        if !self.done {
            self.flush_held(&mut out);
            self.done = true;
        }
        out
    }

    fn flush_held(&mut self, out: &mut Vec<Sample>) {
        if let Some(held) = self.held_before.take() {
            self.push(held, out);
        }
    }

    fn push(&mut self, sample: Sample, out: &mut Vec<Sample>) {
        if self.done {
            return;
        }
        out.push(sample);
        self.emitted += 1;
        if self.limit > 0 && self.emitted >= self.limit {
            self.done = true;
        }
    }
}
