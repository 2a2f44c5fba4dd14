//! Uniform driving interface over the processing state machines.

use hist_core::{AggregateBucket, Sample};
use hist_processing::{AtTimesInterpolator, BoundaryFilter, PlotSelector, ResampleStep, Resampler};

/// Output of offering one raw sample.
pub(crate) struct Offer<T> {
    /// Results that became final.
    pub output: Vec<T>,
    /// Offer the same sample again after emitting `output`.
    pub retry: bool,
}

impl<T> Offer<T> {
    fn done(output: Vec<T>) -> Self {
        Self {
            output,
            retry: false,
        }
    }
}

/// A per-tag transformation from raw samples to results.
pub(crate) trait RawProcessor: Send + 'static {
    type Output: Send + 'static;

    /// Absorb one raw sample.
    fn offer(&mut self, sample: &Sample) -> Offer<Self::Output>;

    /// Whether further raw samples can no longer change the output.
    fn is_done(&self) -> bool;

    /// Next batch of results at end of input, `None` when exhausted.
    fn drain(&mut self) -> Option<Vec<Self::Output>>;
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

impl RawProcessor for BoundaryFilter {
    type Output = Sample;

    fn offer(&mut self, sample: &Sample) -> Offer<Sample> {
        Offer::done(BoundaryFilter::offer(self, sample.clone()))
    }

    fn is_done(&self) -> bool {
        BoundaryFilter::is_done(self)
    }

    fn drain(&mut self) -> Option<Vec<Sample>> {
        non_empty(self.finish())
    }
}

impl RawProcessor for Resampler {
    type Output = AggregateBucket;

    fn offer(&mut self, sample: &Sample) -> Offer<AggregateBucket> {
        match Resampler::offer(self, sample) {
            ResampleStep::Closed(buckets) => Offer {
                output: buckets,
                retry: true,
            },
            ResampleStep::NeedMore | ResampleStep::Finished => Offer::done(Vec::new()),
        }
    }

    fn is_done(&self) -> bool {
        self.is_finished()
    }

    fn drain(&mut self) -> Option<Vec<AggregateBucket>> {
        self.close_interval()
    }
}

impl RawProcessor for PlotSelector {
    type Output = Sample;

    fn offer(&mut self, sample: &Sample) -> Offer<Sample> {
        Offer::done(PlotSelector::offer(self, sample).unwrap_or_default())
    }

    fn is_done(&self) -> bool {
        PlotSelector::is_done(self)
    }

    fn drain(&mut self) -> Option<Vec<Sample>> {
        non_empty(self.finish())
    }
}

impl RawProcessor for AtTimesInterpolator {
    type Output = Sample;

    fn offer(&mut self, sample: &Sample) -> Offer<Sample> {
        Offer::done(AtTimesInterpolator::offer(self, sample))
    }

    fn is_done(&self) -> bool {
        self.is_complete()
    }

    fn drain(&mut self) -> Option<Vec<Sample>> {
        non_empty(self.finish())
    }
}
