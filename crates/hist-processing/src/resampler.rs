//! Fixed-interval statistical aggregation.
//!
//! [`Resampler`] consumes one tag's raw samples in timestamp order and emits,
//! for every interval of an [`IntervalGrid`], one [`AggregateBucket`] per
//! requested function. Each interval keeps only running statistics
//! (counts, Welford mean/variance, extrema, first/last, interpolation
//! brackets), so memory is constant regardless of how many raw samples fall
//! into an interval.
//!
//! # Driving protocol
//!
//! ```text
//! loop {
//!     match resampler.offer(&sample) {
//!         NeedMore         => pull next sample,
//!         Closed(buckets)  => emit buckets, offer the SAME sample again,
//!         Finished         => stop pulling,
//!     }
//! }
//! // end of raw stream:
//! while let Some(buckets) = resampler.close_interval() { emit buckets }
//! ```
//!
//! Returning one closed interval at a time lets the caller check
//! cancellation between intervals and never emit a partial bucket.
//!
//! # Result semantics
//!
//! | Zero good samples | result |
//! |---|---|
//! | AVG, MIN, MAX, RANGE, DELTA, VARIANCE, STDDEV | `NaN`, Bad |
//! | COUNT | `0`, Bad |
//! | PERCENTGOOD/PERCENTBAD with zero samples | `NaN`, Bad |

use crate::grid::IntervalGrid;
use crate::interpolate::interpolate_at;
use chrono::{DateTime, Utc};
use hist_core::{AggregateBucket, AggregateFunction, HistResult, Quality, Sample};
use std::time::Duration;
use tracing::debug;

/// Outcome of offering one raw sample to a [`Resampler`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResampleStep {
    /// Sample absorbed; offer the next one.
    NeedMore,
    /// The current interval closed before this sample. Emit the buckets and
    /// offer the same sample again.
    Closed(Vec<AggregateBucket>),
    /// Every interval has been emitted.
    Finished,
}

/// Streaming resampler for one tag.
#[derive(Debug)]
pub struct Resampler {
    grid: IntervalGrid,
    functions: Vec<AggregateFunction>,
    current: u64,
    stats: IntervalStats,
    /// Latest sample strictly before the current interval.
    before: Option<Sample>,
    /// First sample at or after the current interval start.
    after: Option<Sample>,
    /// Latest accepted sample.
    latest: Option<Sample>,
}

impl Resampler {
    /// Resampler over `[start, end)` in steps of `interval`.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
        functions: Vec<AggregateFunction>,
    ) -> HistResult<Self> {
        Ok(Self::with_grid(IntervalGrid::new(start, end, interval)?, functions))
    }

    /// Resampler over an existing grid.
    pub fn with_grid(grid: IntervalGrid, functions: Vec<AggregateFunction>) -> Self {
        Self {
            grid,
            functions,
            current: 0,
            stats: IntervalStats::default(),
            before: None,
            after: None,
            latest: None,
        }
    }

    /// The interval grid.
    pub fn grid(&self) -> &IntervalGrid {
        &self.grid
    }

    /// Whether every interval has been emitted.
    pub fn is_finished(&self) -> bool {
        self.current >= self.grid.len()
    }

    /// Offer the next raw sample.
    pub fn offer(&mut self, sample: &Sample) -> ResampleStep {
        if self.is_finished() {
            return ResampleStep::Finished;
        }
        if let Some(latest) = &self.latest {
            if sample.timestamp < latest.timestamp {
                debug!(
                    timestamp = %sample.timestamp,
                    previous = %latest.timestamp,
                    "Dropping out-of-order raw sample"
                );
                return ResampleStep::NeedMore;
            }
        }

        let (start, end) = self.grid.bounds(self.current);
        if sample.timestamp < start {
            self.before = Some(sample.clone());
            self.latest = Some(sample.clone());
            return ResampleStep::NeedMore;
        }
        if self.after.is_none() {
            self.after = Some(sample.clone());
        }
        if sample.timestamp < end {
            self.stats.add(sample);
            self.latest = Some(sample.clone());
            return ResampleStep::NeedMore;
        }
        ResampleStep::Closed(self.close_current())
    }

    /// Close the current interval at end of input.
    ///
    /// Returns `None` once every interval has been emitted.
    pub fn close_interval(&mut self) -> Option<Vec<AggregateBucket>> {
        if self.is_finished() {
            return None;
        }
        Some(self.close_current())
    }

    fn close_current(&mut self) -> Vec<AggregateBucket> {
        let (start, end) = self.grid.bounds(self.current);
        let buckets = self
            .functions
            .iter()
            .map(|&function| AggregateBucket {
                interval_start: start,
                interval_end: end,
                function,
                result: self.compute(function, start),
                source_sample_count: self.stats.total,
                skipped_non_good_count: self.stats.non_good,
            })
            .collect();

        self.current += 1;
        self.before = self.latest.clone();
        self.after = None;
        self.stats = IntervalStats::default();
        buckets
    }

    fn compute(&self, function: AggregateFunction, start: DateTime<Utc>) -> Sample {
        let stats = &self.stats;
        let quality = stats.numeric_quality();
        let numeric = |value: Option<f64>| match value {
            Some(v) if stats.numeric.count > 0 => Sample::new(start, v, quality),
            _ => Sample::bad_nan(start),
        };

        match function {
            AggregateFunction::Avg => numeric(Some(stats.numeric.mean)),
            AggregateFunction::Min => extremum(stats.min.as_ref(), start, quality),
            AggregateFunction::Max => extremum(stats.max.as_ref(), start, quality),
            AggregateFunction::Count => {
                if stats.good == 0 {
                    Sample::new(start, 0i64, Quality::Bad)
                } else {
                    let quality = if stats.non_good > 0 {
                        Quality::Uncertain
                    } else {
                        Quality::Good
                    };
                    Sample::new(start, stats.good as i64, quality)
                }
            }
            AggregateFunction::Range => numeric(
                stats
                    .min
                    .as_ref()
                    .zip(stats.max.as_ref())
                    .map(|((lo, _), (hi, _))| (hi - lo).abs()),
            ),
            AggregateFunction::Delta => {
                numeric(stats.first_good.zip(stats.last_good).map(|(a, b)| b - a))
            }
            AggregateFunction::PercentGood => percentage(stats.total, stats.good, start),
            AggregateFunction::PercentBad => percentage(stats.total, stats.non_good, start),
            AggregateFunction::Interp => {
                interpolate_at(self.before.as_ref(), self.after.as_ref(), start)
            }
            AggregateFunction::Variance => numeric(Some(stats.numeric.variance())),
            AggregateFunction::StdDev => numeric(Some(stats.numeric.variance().sqrt())),
        }
    }
}

fn extremum(found: Option<&(f64, Sample)>, start: DateTime<Utc>, quality: Quality) -> Sample {
    match found {
        Some((_, sample)) => sample.restamped(sample.timestamp, quality),
        None => Sample::bad_nan(start),
    }
}

fn percentage(total: usize, part: usize, start: DateTime<Utc>) -> Sample {
    if total == 0 {
        return Sample::bad_nan(start);
    }
    Sample::new(start, 100.0 * part as f64 / total as f64, Quality::Good)
}

/// Running statistics of one interval.
#[derive(Debug, Default)]
struct IntervalStats {
    total: usize,
    good: usize,
    non_good: usize,
    /// Good samples without a numeric view (strings, NaN).
    non_numeric_good: usize,
    numeric: Welford,
    min: Option<(f64, Sample)>,
    max: Option<(f64, Sample)>,
    first_good: Option<f64>,
    last_good: Option<f64>,
}

impl IntervalStats {
    fn add(&mut self, sample: &Sample) {
        self.total += 1;
        if !sample.quality.is_good() {
            self.non_good += 1;
            return;
        }
        self.good += 1;

        let Some(v) = sample.value.as_f64().filter(|v| !v.is_nan()) else {
            self.non_numeric_good += 1;
            return;
        };
        self.numeric.push(v);
        // Strict comparison keeps the earliest sample on ties
        if self.min.as_ref().map_or(true, |(m, _)| v < *m) {
            self.min = Some((v, sample.clone()));
        }
        if self.max.as_ref().map_or(true, |(m, _)| v > *m) {
            self.max = Some((v, sample.clone()));
        }
        self.first_good.get_or_insert(v);
        self.last_good = Some(v);
    }

    fn numeric_quality(&self) -> Quality {
        if self.non_good > 0 || self.non_numeric_good > 0 {
            Quality::Uncertain
        } else {
            Quality::Good
        }
    }
}

/// Welford's online mean and population variance.
#[derive(Debug, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Resample an in-memory, time-ordered sample sequence.
///
/// Buckets are returned in interval order, functions in request order within
/// each interval.
pub fn resample<I>(
    samples: I,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Duration,
    functions: &[AggregateFunction],
) -> HistResult<Vec<AggregateBucket>>
where
    I: IntoIterator<Item = Sample>,
{
    let mut resampler = Resampler::new(start, end, interval, functions.to_vec())?;
    let mut buckets = Vec::new();
    'samples: for sample in samples {
        loop {
            match resampler.offer(&sample) {
                ResampleStep::NeedMore => break,
                ResampleStep::Closed(closed) => buckets.extend(closed),
                ResampleStep::Finished => break 'samples,
            }
        }
    }
    while let Some(closed) = resampler.close_interval() {
        buckets.extend(closed);
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as TimeDelta, TimeZone};
    use hist_core::Value;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn sample(secs: i64, value: f64, quality: Quality) -> Sample {
        Sample::new(at(secs), value, quality)
    }

    fn run(samples: Vec<Sample>, end: i64, interval: u64, functions: &[AggregateFunction]) -> Vec<AggregateBucket> {
        resample(samples, t0(), at(end), Duration::from_secs(interval), functions).unwrap()
    }

    fn value(bucket: &AggregateBucket) -> f64 {
        bucket.result.value.as_f64().unwrap()
    }

    #[test]
    fn test_average_skips_bad_sample_and_is_uncertain() {
        let samples = vec![
            sample(0, 10.0, Quality::Good),
            sample(1, 20.0, Quality::Bad),
            sample(2, 30.0, Quality::Good),
        ];
        let buckets = run(
            samples,
            3,
            3,
            &[AggregateFunction::Avg, AggregateFunction::Count],
        );
        assert_eq!(buckets.len(), 2);

        let avg = &buckets[0];
        assert_eq!(avg.function, AggregateFunction::Avg);
        assert_eq!(value(avg), 20.0);
        assert_eq!(avg.result.quality, Quality::Uncertain);
        assert_eq!(avg.result.timestamp, t0());
        assert_eq!(avg.source_sample_count, 3);
        assert_eq!(avg.skipped_non_good_count, 1);

        let count = &buckets[1];
        assert_eq!(count.result.value, Value::Int64(2));
        assert_eq!(count.result.quality, Quality::Uncertain);
    }

    #[test]
    fn test_bucket_count_is_ceiling_of_range_over_interval() {
        for (end, interval, expected) in [(10, 3, 4), (9, 3, 3), (1, 5, 1), (60, 1, 60)] {
            let buckets = run(vec![], end, interval, &[AggregateFunction::Avg]);
            assert_eq!(buckets.len(), expected, "end={end} interval={interval}");
        }
    }

    #[test]
    fn test_min_max_report_actual_sample_time() {
        let samples = vec![
            sample(0, 5.0, Quality::Good),
            sample(1, 1.0, Quality::Good),
            sample(2, 9.0, Quality::Good),
            sample(3, 1.0, Quality::Good),
            sample(4, 9.0, Quality::Good),
        ];
        let buckets = run(samples, 5, 5, &[AggregateFunction::Min, AggregateFunction::Max]);
        let min = &buckets[0];
        let max = &buckets[1];
        assert_eq!((value(min), min.result.timestamp), (1.0, at(1)));
        assert_eq!((value(max), max.result.timestamp), (9.0, at(2)));
        assert_eq!(min.result.quality, Quality::Good);
        assert!(min.result.timestamp >= min.interval_start);
        assert!(max.result.timestamp < max.interval_end);
    }

    #[test]
    fn test_empty_interval_and_only_bad_interval_both_emit() {
        let samples = vec![sample(3, 1.0, Quality::Bad), sample(4, 2.0, Quality::Bad)];
        let buckets = run(
            samples,
            6,
            3,
            &[AggregateFunction::Avg, AggregateFunction::Count],
        );
        assert_eq!(buckets.len(), 4);

        // [0,3): no samples at all
        assert!(buckets[0].result.value.is_nan());
        assert_eq!(buckets[0].result.quality, Quality::Bad);
        assert_eq!(buckets[0].source_sample_count, 0);
        assert_eq!(buckets[1].result.value, Value::Int64(0));
        assert_eq!(buckets[1].result.quality, Quality::Bad);

        // [3,6): samples present but none good
        assert!(buckets[2].result.value.is_nan());
        assert_eq!(buckets[2].result.quality, Quality::Bad);
        assert_eq!(buckets[2].source_sample_count, 2);
        assert_eq!(buckets[2].skipped_non_good_count, 2);
    }

    #[test]
    fn test_all_good_samples_yield_good_quality() {
        let samples = vec![sample(0, 2.0, Quality::Good), sample(1, 4.0, Quality::Good)];
        let buckets = run(
            samples,
            2,
            2,
            &[
                AggregateFunction::Avg,
                AggregateFunction::Range,
                AggregateFunction::Delta,
                AggregateFunction::Variance,
                AggregateFunction::StdDev,
            ],
        );
        assert!(buckets.iter().all(|b| b.result.quality == Quality::Good));
        assert_eq!(value(&buckets[0]), 3.0);
        assert_eq!(value(&buckets[1]), 2.0);
        assert_eq!(value(&buckets[2]), 2.0);
        assert_eq!(value(&buckets[3]), 1.0);
        assert_eq!(value(&buckets[4]), 1.0);
    }

    #[test]
    fn test_delta_is_signed() {
        let samples = vec![sample(0, 8.0, Quality::Good), sample(1, 3.0, Quality::Good)];
        let buckets = run(samples, 2, 2, &[AggregateFunction::Delta, AggregateFunction::Range]);
        assert_eq!(value(&buckets[0]), -5.0);
        assert_eq!(value(&buckets[1]), 5.0);
    }

    #[test]
    fn test_percent_metrics_are_always_good() {
        let samples = vec![
            sample(0, 1.0, Quality::Good),
            sample(1, 1.0, Quality::Bad),
            sample(2, 1.0, Quality::Uncertain),
            sample(3, 1.0, Quality::Good),
        ];
        let buckets = run(
            samples,
            4,
            4,
            &[AggregateFunction::PercentGood, AggregateFunction::PercentBad],
        );
        assert_eq!(value(&buckets[0]), 50.0);
        assert_eq!(value(&buckets[1]), 50.0);
        assert!(buckets.iter().all(|b| b.result.quality == Quality::Good));
    }

    #[test]
    fn test_interp_reaches_outside_the_window() {
        // Bracketing samples at -2s and +2s relative to the boundary at 10s.
        let samples = vec![
            sample(8, 0.0, Quality::Good),
            sample(12, 40.0, Quality::Uncertain),
        ];
        let buckets = resample(
            samples,
            at(10),
            at(20),
            Duration::from_secs(10),
            &[AggregateFunction::Interp],
        )
        .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(value(&buckets[0]), 20.0);
        assert_eq!(buckets[0].result.timestamp, at(10));
        assert_eq!(buckets[0].result.quality, Quality::Uncertain);
    }

    #[test]
    fn test_interp_without_following_sample_is_bad() {
        let samples = vec![sample(0, 7.0, Quality::Good)];
        let buckets = run(samples, 20, 10, &[AggregateFunction::Interp]);
        // Exact match at the first boundary
        assert_eq!(value(&buckets[0]), 7.0);
        assert_eq!(buckets[0].result.quality, Quality::Good);
        // Nothing after 10s
        assert_eq!(value(&buckets[1]), 7.0);
        assert_eq!(buckets[1].result.quality, Quality::Bad);
    }

    #[test]
    fn test_string_values_count_but_make_numeric_results_uncertain() {
        let samples = vec![
            sample(0, 4.0, Quality::Good),
            Sample::good(at(1), "RUNNING"),
        ];
        let buckets = run(samples, 2, 2, &[AggregateFunction::Avg, AggregateFunction::Count]);
        assert_eq!(value(&buckets[0]), 4.0);
        assert_eq!(buckets[0].result.quality, Quality::Uncertain);
        assert_eq!(buckets[1].result.value, Value::Int64(2));
        assert_eq!(buckets[1].result.quality, Quality::Good);
    }

    #[test]
    fn test_out_of_order_samples_dropped() {
        let samples = vec![
            sample(2, 10.0, Quality::Good),
            sample(1, 1000.0, Quality::Good),
            sample(3, 20.0, Quality::Good),
        ];
        let buckets = run(samples, 4, 4, &[AggregateFunction::Avg]);
        assert_eq!(value(&buckets[0]), 15.0);
        assert_eq!(buckets[0].source_sample_count, 2);
    }

    #[test]
    fn test_samples_past_end_finish_the_resampler() {
        let mut resampler = Resampler::new(
            t0(),
            at(2),
            Duration::from_secs(1),
            vec![AggregateFunction::Count],
        )
        .unwrap();
        let late = sample(5, 1.0, Quality::Good);
        assert!(matches!(resampler.offer(&late), ResampleStep::Closed(_)));
        assert!(matches!(resampler.offer(&late), ResampleStep::Closed(_)));
        assert_eq!(resampler.offer(&late), ResampleStep::Finished);
        assert!(resampler.close_interval().is_none());
    }

    #[test]
    fn test_identical_input_gives_identical_buckets() {
        let samples: Vec<Sample> = (0..100)
            .map(|i| sample(i, (i as f64 * 0.7).sin(), Quality::Good))
            .collect();
        let functions = AggregateFunction::ALL;
        let first = run(samples.clone(), 100, 7, &functions);
        let second = run(samples, 100, 7, &functions);
        assert_eq!(first.len(), 15 * functions.len());
        // NaN != NaN, so compare the Debug output
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }
}
