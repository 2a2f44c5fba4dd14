//! Query request types and their validation.
//!
//! Every request is validated in full before the façade starts any work, so
//! that a malformed request fails the whole call without producing a single
//! stream element.
//!
//! # Time ranges
//!
//! All ranges require `utc_end_time > utc_start_time`. Raw queries treat the
//! range as closed (`start <= t <= end`, see [`BoundaryType`]); aggregation
//! intervals are half-open (`[start_i, end_i)`), the last interval being
//! truncated at `utc_end_time`.

use crate::error::{HistError, HistResult};
use crate::function::AggregateFunction;
use crate::limits::QueryLimits;
use crate::tag::TagKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// How samples near the edges of a raw query range are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    /// Only samples with `start <= t <= end` (both ends inclusive).
    #[default]
    Inside,
    /// Inside samples plus the latest sample before `start` and the first
    /// sample after `end`.
    Outside,
}

/// Raw sample query for a batch of tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQueryRequest {
    /// Tag ids or names (case-insensitive).
    pub tag_ids: Vec<String>,
    /// Range start.
    pub utc_start_time: DateTime<Utc>,
    /// Range end.
    pub utc_end_time: DateTime<Utc>,
    /// Edge treatment.
    #[serde(default)]
    pub boundary_type: BoundaryType,
    /// Maximum samples returned per tag (0 = unlimited).
    #[serde(default)]
    pub sample_count_limit_per_tag: usize,
}

impl RawQueryRequest {
    /// Validate the request.
    pub fn validate(&self, limits: &QueryLimits) -> HistResult<()> {
        validate_tags(&self.tag_ids, limits)?;
        validate_range(self.utc_start_time, self.utc_end_time)
    }
}

/// Processed (aggregated) query for a batch of tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    /// Tag ids or names (case-insensitive).
    pub tag_ids: Vec<String>,
    /// Aggregate function ids (e.g. `"AVG"`, case-insensitive).
    pub function_ids: Vec<String>,
    /// Start of the first interval.
    pub utc_start_time: DateTime<Utc>,
    /// End of the last interval.
    pub utc_end_time: DateTime<Utc>,
    /// Interval width; must be positive.
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl AggregationRequest {
    /// Validate the request and return the parsed, de-duplicated functions.
    pub fn validate(&self, limits: &QueryLimits) -> HistResult<Vec<AggregateFunction>> {
        validate_tags(&self.tag_ids, limits)?;
        validate_range(self.utc_start_time, self.utc_end_time)?;
        let buckets = self.bucket_count()?;
        if buckets > limits.max_intervals {
            return Err(HistError::InvalidRequest(format!(
                "request spans {} intervals, maximum is {}",
                buckets, limits.max_intervals
            )));
        }
        self.functions()
    }

    /// Parsed aggregate functions in request order, duplicates removed.
    pub fn functions(&self) -> HistResult<Vec<AggregateFunction>> {
        if self.function_ids.is_empty() {
            return Err(HistError::InvalidRequest(
                "at least one aggregate function is required".into(),
            ));
        }
        let mut functions = Vec::with_capacity(self.function_ids.len());
        for id in &self.function_ids {
            let function: AggregateFunction = id.parse()?;
            if !functions.contains(&function) {
                functions.push(function);
            }
        }
        Ok(functions)
    }

    /// Number of intervals per tag: `ceil((end - start) / interval)`.
    pub fn bucket_count(&self) -> HistResult<u64> {
        interval_count(self.utc_start_time, self.utc_end_time, self.sample_interval)
    }
}

/// Visualization-oriented down-sampling query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRequest {
    /// Tag ids or names (case-insensitive).
    pub tag_ids: Vec<String>,
    /// Range start.
    pub utc_start_time: DateTime<Utc>,
    /// Range end.
    pub utc_end_time: DateTime<Utc>,
    /// Number of intervals (horizontal resolution of the plot).
    pub interval_count: u32,
}

impl PlotRequest {
    /// Validate the request.
    pub fn validate(&self, limits: &QueryLimits) -> HistResult<()> {
        validate_tags(&self.tag_ids, limits)?;
        validate_range(self.utc_start_time, self.utc_end_time)?;
        if self.interval_count == 0 {
            return Err(HistError::InvalidRequest(
                "interval_count must be positive".into(),
            ));
        }
        if u64::from(self.interval_count) > limits.max_intervals {
            return Err(HistError::InvalidRequest(format!(
                "interval_count {} exceeds maximum {}",
                self.interval_count, limits.max_intervals
            )));
        }
        Ok(())
    }
}

/// Values-at-times query: one interpolated value per requested timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtTimesRequest {
    /// Tag ids or names (case-insensitive).
    pub tag_ids: Vec<String>,
    /// Target timestamps, in any order.
    pub utc_timestamps: Vec<DateTime<Utc>>,
}

impl AtTimesRequest {
    /// Validate the request.
    pub fn validate(&self, limits: &QueryLimits) -> HistResult<()> {
        validate_tags(&self.tag_ids, limits)?;
        if self.utc_timestamps.is_empty() {
            return Err(HistError::InvalidRequest(
                "at least one timestamp is required".into(),
            ));
        }
        if self.utc_timestamps.len() as u64 > limits.max_intervals {
            return Err(HistError::InvalidRequest(format!(
                "{} timestamps requested, maximum is {}",
                self.utc_timestamps.len(),
                limits.max_intervals
            )));
        }
        Ok(())
    }

    /// Earliest and latest requested timestamp.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let min = self.utc_timestamps.iter().min()?;
        let max = self.utc_timestamps.iter().max()?;
        Some((*min, *max))
    }
}

// =============================================================================
// Shared validation helpers
// =============================================================================

/// Reject empty or oversized tag batches.
pub fn validate_tags(tag_ids: &[String], limits: &QueryLimits) -> HistResult<()> {
    if tag_ids.is_empty() {
        return Err(HistError::InvalidRequest("tag list is empty".into()));
    }
    if tag_ids.len() > limits.max_tags {
        return Err(HistError::InvalidRequest(format!(
            "{} tags requested, maximum is {}",
            tag_ids.len(),
            limits.max_tags
        )));
    }
    if tag_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(HistError::InvalidRequest(
            "tag identifiers must not be blank".into(),
        ));
    }
    Ok(())
}

/// Reject ranges where `end <= start`.
pub fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> HistResult<()> {
    if end <= start {
        return Err(HistError::InvalidRequest(format!(
            "end time {} must be after start time {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(())
}

/// Number of `interval`-wide steps needed to cover `[start, end)`.
pub fn interval_count(start: DateTime<Utc>, end: DateTime<Utc>, interval: Duration) -> HistResult<u64> {
    validate_range(start, end)?;
    let interval_ns = interval_nanos(interval)?;
    let span_ns = (end - start)
        .num_nanoseconds()
        .ok_or_else(|| HistError::InvalidRequest("time range is too large".into()))?;
    // span_ns > 0 after validate_range, interval_ns > 0 by construction
    Ok((span_ns as u64).div_ceil(interval_ns as u64))
}

/// Positive interval length in nanoseconds.
pub fn interval_nanos(interval: Duration) -> HistResult<i64> {
    let nanos = i64::try_from(interval.as_nanos())
        .map_err(|_| HistError::InvalidRequest("sample interval is too large".into()))?;
    if nanos <= 0 {
        return Err(HistError::InvalidRequest(
            "sample interval must be positive".into(),
        ));
    }
    Ok(nanos)
}

/// De-duplicate identifiers case-insensitively, keeping first occurrences.
pub fn dedup_identifiers(tag_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tag_ids
        .iter()
        .filter(|id| seen.insert(TagKey::new(id)))
        .cloned()
        .collect()
}
