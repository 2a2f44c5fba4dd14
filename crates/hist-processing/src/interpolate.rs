//! Linear interpolation between bracketing samples.

use chrono::{DateTime, Utc};
use hist_core::{Quality, Sample, Value};
use tracing::debug;

/// Value at `at` from the nearest samples at-or-before and at-or-after it.
///
/// - An exact-time sample is returned unchanged.
/// - Two numeric brackets interpolate linearly; quality is the worse of the two.
/// - Non-numeric brackets hold the earlier value.
/// - A missing bracket yields the other sample's value with Bad quality.
/// - No brackets yields `NaN` with Bad quality.
pub fn interpolate_at(before: Option<&Sample>, after: Option<&Sample>, at: DateTime<Utc>) -> Sample {
    match (before, after) {
        (_, Some(a)) if a.timestamp == at => a.clone(),
        (Some(b), _) if b.timestamp == at => b.clone(),
        (Some(b), Some(a)) => {
            let quality = b.quality.worst(a.quality);
            match (b.value.as_f64(), a.value.as_f64()) {
                (Some(v0), Some(v1)) => {
                    let span = nanos_between(b.timestamp, a.timestamp);
                    if span <= 0.0 {
                        return b.restamped(at, quality);
                    }
                    let fraction = nanos_between(b.timestamp, at) / span;
                    Sample::new(at, Value::Float64(v0 + (v1 - v0) * fraction), quality)
                }
                _ => b.restamped(at, quality),
            }
        }
        (Some(b), None) => b.restamped(at, Quality::Bad),
        (None, Some(a)) => a.restamped(at, Quality::Bad),
        (None, None) => Sample::bad_nan(at),
    }
}

fn nanos_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    delta
        .num_nanoseconds()
        .map(|ns| ns as f64)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 * 1e6)
}

/// Streaming values-at-times computation for one tag.
///
/// Targets are sorted ascending on construction (duplicates kept). Each
/// offered raw sample resolves every pending target at or before it.
#[derive(Debug)]
pub struct AtTimesInterpolator {
    targets: Vec<DateTime<Utc>>,
    next: usize,
    previous: Option<Sample>,
}

impl AtTimesInterpolator {
    /// Interpolator for `targets` (any order).
    pub fn new(mut targets: Vec<DateTime<Utc>>) -> Self {
        targets.sort_unstable();
        Self {
            targets,
            next: 0,
            previous: None,
        }
    }

    /// Whether every target has been resolved.
    pub fn is_complete(&self) -> bool {
        self.next >= self.targets.len()
    }

    /// Offer the next raw sample, returning the targets it resolved.
    pub fn offer(&mut self, sample: &Sample) -> Vec<Sample> {
        if let Some(previous) = &self.previous {
            if sample.timestamp < previous.timestamp {
                debug!(timestamp = %sample.timestamp, "Dropping out-of-order raw sample");
                return Vec::new();
            }
        }

        let mut resolved = Vec::new();
        while let Some(&target) = self.targets.get(self.next) {
            if target > sample.timestamp {
                break;
            }
            resolved.push(interpolate_at(self.previous.as_ref(), Some(sample), target));
            self.next += 1;
        }
        self.previous = Some(sample.clone());
        resolved
    }

    /// Resolve the remaining targets at end of input.
    pub fn finish(&mut self) -> Vec<Sample> {
        let remaining = self.targets.get(self.next..).unwrap_or_default();
        let resolved = remaining
            .iter()
            .map(|&target| interpolate_at(self.previous.as_ref(), None, target))
            .collect();
        self.next = self.targets.len();
        resolved
    }
}

/// Values at `targets` over an in-memory, time-ordered sample sequence.
///
/// Output is ordered by ascending target time, one sample per target.
pub fn values_at_times<I>(samples: I, targets: &[DateTime<Utc>]) -> Vec<Sample>
where
    I: IntoIterator<Item = Sample>,
{
    let mut interpolator = AtTimesInterpolator::new(targets.to_vec());
    let mut out = Vec::with_capacity(targets.len());
    for sample in samples {
        if interpolator.is_complete() {
            break;
        }
        out.extend(interpolator.offer(&sample));
    }
    out.extend(interpolator.finish());
    out
}
