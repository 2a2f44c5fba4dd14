//! Plot down-sampling.
//!
//! For each of `interval_count` equal intervals the selector keeps a handful
//! of *recorded* samples instead of computing a statistic: the first, the
//! last, the minimum, the maximum and the first non-good sample. Picks are
//! deduplicated and emitted in time order, so a line chart drawn through
//! them shows every spike and every quality excursion of the raw data.
//!
//! The first and last samples of the whole range are always kept because
//! they are the first pick of the first populated interval and the last pick
//! of the last populated one.

use crate::grid::IntervalGrid;
use chrono::{DateTime, Utc};
use hist_core::{HistResult, Sample};
use tracing::debug;

/// Streaming plot selector for one tag.
#[derive(Debug)]
pub struct PlotSelector {
    grid: IntervalGrid,
    current: Option<u64>,
    picks: IntervalPicks,
    last_timestamp: Option<DateTime<Utc>>,
    done: bool,
}

impl PlotSelector {
    /// Selector over `[start, end]` split into `interval_count` intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, interval_count: u32) -> HistResult<Self> {
        Ok(Self {
            grid: IntervalGrid::with_count(start, end, u64::from(interval_count))?,
            current: None,
            picks: IntervalPicks::default(),
            last_timestamp: None,
            done: false,
        })
    }

    /// Whether a sample past the range end has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Offer the next raw sample.
    ///
    /// Returns the picks of an interval once a sample for a later interval
    /// (or past the range end) arrives.
    pub fn offer(&mut self, sample: &Sample) -> Option<Vec<Sample>> {
        if self.done {
            return None;
        }
        if self.last_timestamp.is_some_and(|last| sample.timestamp < last) {
            debug!(timestamp = %sample.timestamp, "Dropping out-of-order raw sample");
            return None;
        }
        self.last_timestamp = Some(sample.timestamp);

        if sample.timestamp < self.grid.start() {
            return None;
        }
        let Some(index) = self.grid.index_of_closed(sample.timestamp) else {
            self.done = true;
            return self.take_picks();
        };

        match self.current {
            Some(current) if current == index => {
                self.picks.add(sample);
                None
            }
            _ => {
                let closed = self.take_picks();
                self.current = Some(index);
                self.picks.add(sample);
                closed
            }
        }
    }

    /// Picks of the last open interval at end of input.
    pub fn finish(&mut self) -> Vec<Sample> {
        self.done = true;
        self.take_picks().unwrap_or_default()
    }

    fn take_picks(&mut self) -> Option<Vec<Sample>> {
        let picks = std::mem::take(&mut self.picks).into_samples();
        (!picks.is_empty()).then_some(picks)
    }
}

/// Candidate picks of one interval, each tagged with its arrival sequence.
#[derive(Debug, Default)]
struct IntervalPicks {
    seen: usize,
    first: Option<(usize, Sample)>,
    last: Option<(usize, Sample)>,
    min: Option<(usize, f64, Sample)>,
    max: Option<(usize, f64, Sample)>,
    first_non_good: Option<(usize, Sample)>,
}

impl IntervalPicks {
    fn add(&mut self, sample: &Sample) {
        let seq = self.seen;
        self.seen += 1;

        if self.first.is_none() {
            self.first = Some((seq, sample.clone()));
        }
        self.last = Some((seq, sample.clone()));
        if !sample.quality.is_good() && self.first_non_good.is_none() {
            self.first_non_good = Some((seq, sample.clone()));
        }
        if let Some(v) = sample.value.as_f64().filter(|v| !v.is_nan()) {
            if self.min.as_ref().map_or(true, |(_, m, _)| v < *m) {
                self.min = Some((seq, v, sample.clone()));
            }
            if self.max.as_ref().map_or(true, |(_, m, _)| v > *m) {
                self.max = Some((seq, v, sample.clone()));
            }
        }
    }

    fn into_samples(self) -> Vec<Sample> {
        let mut picks: Vec<(usize, Sample)> = [self.first, self.last, self.first_non_good]
            .into_iter()
            .flatten()
            .chain(self.min.map(|(seq, _, s)| (seq, s)))
            .chain(self.max.map(|(seq, _, s)| (seq, s)))
            .collect();
        picks.sort_by_key(|(seq, _)| *seq);
        picks.dedup_by_key(|(seq, _)| *seq);
        picks.into_iter().map(|(_, sample)| sample).collect()
    }
}

/// Plot selection over an in-memory, time-ordered sample sequence.
pub fn select_plot_samples<I>(
    samples: I,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval_count: u32,
) -> HistResult<Vec<Sample>>
where
    I: IntoIterator<Item = Sample>,
{
    let mut selector = PlotSelector::new(start, end, interval_count)?;
    let mut out = Vec::new();
    for sample in samples {
        if let Some(picks) = selector.offer(&sample) {
            out.extend(picks);
        }
        if selector.is_done() {
            break;
        }
    }
    out.extend(selector.finish());
    Ok(out)
}
