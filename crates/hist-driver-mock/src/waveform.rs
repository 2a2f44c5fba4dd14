//! Synthetic history generation.
//!
//! Produces evenly spaced samples from a simple waveform with optional noise
//! and an optional rate of bad-quality samples, for demos and load tests.

use crate::common::MockRng;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use hist_core::{Quality, Sample};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Shape of a synthetic signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    /// `offset + amplitude * sin(2π t / period_secs)`
    Sine {
        /// Peak deviation from `offset`.
        amplitude: f64,
        /// Period in seconds; non-positive yields `offset`.
        period_secs: f64,
        /// Centre value.
        offset: f64,
    },
    /// `start + slope * t` (t in seconds)
    Ramp {
        /// Value of the first sample.
        start: f64,
        /// Change per second.
        slope: f64,
    },
    /// Constant level (noise is added on top)
    Constant {
        /// Output level.
        level: f64,
    },
}

impl Waveform {
    /// Noise-free value `elapsed_secs` after the first sample.
    pub fn value_at(&self, elapsed_secs: f64) -> f64 {
        match *self {
            Waveform::Sine {
                amplitude,
                period_secs,
                offset,
            } => {
                if period_secs <= 0.0 {
                    return offset;
                }
                offset + amplitude * (TAU * elapsed_secs / period_secs).sin()
            }
            Waveform::Ramp { start, slope } => start + slope * elapsed_secs,
            Waveform::Constant { level } => level,
        }
    }
}

/// Parameters of one synthetic series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSeries {
    /// Signal shape.
    pub waveform: Waveform,
    /// Uniform noise amplitude added to every value.
    #[serde(default)]
    pub noise: f64,
    /// Fraction of samples (0.0 to 1.0) recorded with Bad quality.
    #[serde(default)]
    pub bad_rate: f64,
}

impl SyntheticSeries {
    /// Noise-free, always-good series.
    pub fn clean(waveform: Waveform) -> Self {
        Self {
            waveform,
            noise: 0.0,
            bad_rate: 0.0,
        }
    }

    /// `count` samples starting at `start`, `step` apart.
    pub fn generate(
        &self,
        start: DateTime<Utc>,
        step: TimeDelta,
        count: usize,
        rng: &MockRng,
    ) -> Vec<Sample> {
        let step_secs = step.num_milliseconds() as f64 / 1000.0;
        (0..count)
            .map(|i| {
                let elapsed = step_secs * i as f64;
                let value = self.waveform.value_at(elapsed) + rng.jitter(self.noise);
                let quality = if rng.should_fail(self.bad_rate) {
                    Quality::Bad
                } else {
                    Quality::Good
                };
                Sample::new(start + step * i as i32, value, quality)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sine_quarter_period() {
        let sine = Waveform::Sine {
            amplitude: 2.0,
            period_secs: 4.0,
            offset: 10.0,
        };
        assert!((sine.value_at(1.0) - 12.0).abs() < 1e-9);
        assert!((sine.value_at(0.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_generate_spacing_and_quality() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series = SyntheticSeries::clean(Waveform::Ramp {
            start: 0.0,
            slope: 1.0,
        });
        let samples = series.generate(start, TimeDelta::seconds(2), 5, &MockRng::new(Some(3)));
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4].timestamp, start + TimeDelta::seconds(8));
        assert_eq!(samples[4].value.as_f64(), Some(8.0));
        assert!(samples.iter().all(|s| s.quality == Quality::Good));
    }

    #[test]
    fn test_bad_rate_one_marks_every_sample() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series = SyntheticSeries {
            waveform: Waveform::Constant { level: 1.0 },
            noise: 0.5,
            bad_rate: 1.0,
        };
        let samples = series.generate(start, TimeDelta::seconds(1), 10, &MockRng::new(Some(9)));
        assert!(samples.iter().all(|s| s.quality == Quality::Bad));
        assert!(samples
            .iter()
            .all(|s| (s.value.as_f64().unwrap() - 1.0).abs() <= 0.5));
    }

    #[test]
    fn test_waveform_config_deserializes() {
        let json = r#"{"waveform":{"kind":"sine","amplitude":1.0,"period_secs":60.0,"offset":0.0},"noise":0.1}"#;
        let series: SyntheticSeries = serde_json::from_str(json).unwrap();
        assert_eq!(series.bad_rate, 0.0);
        assert!(matches!(series.waveform, Waveform::Sine { .. }));
    }
}
