//! Historical query façade.
//!
//! Every query follows the same shape:
//!
//! 1. Validate the whole request and check the adapter capability. Any
//!    failure here rejects the call before a single element is produced.
//! 2. Spawn one task per distinct tag identifier. Each task resolves its tag
//!    (unknown tags are skipped), opens the raw stream and drives a
//!    processor from `hist-processing` over it.
//! 3. Return the receiving end of a bounded channel shared by all tasks. The
//!    stream ends when the last task finishes.
//!
//! Tasks are isolated: a source failure becomes a [`QueryEvent::Fault`] for
//! that tag only. Cancellation (caller token or adapter shutdown) and a
//! dropped receiver both stop every task at its next raw read or emission.

use crate::event::{QueryEvent, QueryStream};
use crate::processor::RawProcessor;
use crate::sink::{QuerySink, Stopped};
use futures::StreamExt;
use hist_core::request::{dedup_identifiers, validate_tags};
use hist_core::{
    AdapterCapabilities, AggregateBucket, AggregationRequest, AtTimesRequest, BoundaryType,
    CancelScope, HistError, HistResult, PlotRequest, QueryLimits, RawHistory, RawQueryRequest,
    RawRead, Sample, Tag, TagResolver,
};
use hist_processing::{AtTimesInterpolator, BoundaryFilter, IntervalGrid, PlotSelector, Resampler};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, Instrument};

/// Batch historical queries against one adapter.
///
/// Cheap to clone. All query methods spawn Tokio tasks and must be called
/// from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct HistoricalQuery {
    caps: AdapterCapabilities,
    limits: QueryLimits,
    channel_capacity: usize,
    shutdown: CancellationToken,
}

impl HistoricalQuery {
    /// Façade over `caps`, stopped by `shutdown`.
    pub fn new(
        caps: AdapterCapabilities,
        limits: QueryLimits,
        channel_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            caps,
            limits,
            channel_capacity: channel_capacity.max(1),
            shutdown,
        }
    }

    /// Request limits in force.
    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Raw samples per tag, trimmed to the boundary type and limit.
    pub fn query_raw(
        &self,
        request: &RawQueryRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        request.validate(&self.limits)?;
        let read = RawRead {
            utc_start: request.utc_start_time,
            utc_end: request.utc_end_time,
            boundary: request.boundary_type,
            sample_limit: request.sample_count_limit_per_tag,
        };
        self.spawn_raw_jobs("raw", &request.tag_ids, read, cancel, || {
            Ok(BoundaryFilter::new(
                request.utc_start_time,
                request.utc_end_time,
                request.boundary_type,
                request.sample_count_limit_per_tag,
            ))
        })
    }

    /// One bucket per interval and function, per tag.
    pub fn query_aggregated(
        &self,
        request: &AggregationRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<AggregateBucket>> {
        let functions = request.validate(&self.limits)?;
        let grid = IntervalGrid::new(
            request.utc_start_time,
            request.utc_end_time,
            request.sample_interval,
        )?;
        // Outside brackets feed INTERP at the first and last boundaries
        let read = RawRead {
            utc_start: request.utc_start_time,
            utc_end: request.utc_end_time,
            boundary: BoundaryType::Outside,
            sample_limit: 0,
        };
        self.spawn_raw_jobs("aggregated", &request.tag_ids, read, cancel, || {
            Ok(Resampler::with_grid(grid, functions.clone()))
        })
    }

    /// Representative raw samples per plot interval, per tag.
    pub fn query_plot(
        &self,
        request: &PlotRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        request.validate(&self.limits)?;
        let read = RawRead {
            utc_start: request.utc_start_time,
            utc_end: request.utc_end_time,
            boundary: BoundaryType::Inside,
            sample_limit: 0,
        };
        self.spawn_raw_jobs("plot", &request.tag_ids, read, cancel, || {
            PlotSelector::new(
                request.utc_start_time,
                request.utc_end_time,
                request.interval_count,
            )
        })
    }

    /// One value per requested timestamp, per tag, ascending by time.
    pub fn query_at_times(
        &self,
        request: &AtTimesRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        request.validate(&self.limits)?;
        let (first, last) = request
            .span()
            .ok_or_else(|| HistError::InvalidRequest("at least one timestamp is required".into()))?;
        let read = RawRead {
            utc_start: first,
            utc_end: last,
            boundary: BoundaryType::Outside,
            sample_limit: 0,
        };
        self.spawn_raw_jobs("at_times", &request.tag_ids, read, cancel, || {
            Ok(AtTimesInterpolator::new(request.utc_timestamps.clone()))
        })
    }

    /// Current value of each tag, from a single snapshot read.
    ///
    /// A failed read is reported as a fault for every resolved tag that had
    /// not been delivered yet.
    pub fn query_snapshot(
        &self,
        tag_ids: &[String],
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        validate_tags(tag_ids, &self.limits)?;
        let snapshot = self.caps.require_snapshot()?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let sink = QuerySink::new(tx, CancelScope::new(cancel, self.shutdown.clone()));
        let resolver = self.caps.resolver.clone();
        let identifiers = dedup_identifiers(tag_ids);

        tokio::spawn(
            async move {
                let mut tags = Vec::with_capacity(identifiers.len());
                for identifier in &identifiers {
                    match resolve_or_skip(resolver.as_ref(), &sink, identifier).await {
                        Ok(Some(tag)) => tags.push(tag.id),
                        Ok(None) => {}
                        Err(Stopped) => return,
                    }
                }
                if tags.is_empty() {
                    return;
                }

                let opened = tokio::select! {
                    biased;
                    _ = sink.stopped() => return,
                    opened = snapshot.read_snapshot(&tags) => opened,
                };
                let mut values = match opened {
                    Ok(values) => values,
                    Err(e) => {
                        let message = e.to_string();
                        for tag in &tags {
                            let error = HistError::source_unavailable(tag.as_str(), &message);
                            if sink.fault(tag, error).await.is_err() {
                                return;
                            }
                        }
                        return;
                    }
                };

                let mut delivered = HashSet::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = sink.stopped() => return,
                        next = values.next() => next,
                    };
                    match next {
                        None => return,
                        Some(Ok(value)) => {
                            delivered.insert(value.tag_id.clone());
                            if sink.emit(&value.tag_id, value.sample).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let message = e.to_string();
                            for tag in tags.iter().filter(|t| !delivered.contains(*t)) {
                                let error = HistError::source_unavailable(tag.as_str(), &message);
                                if sink.fault(tag, error).await.is_err() {
                                    return;
                                }
                            }
                            return;
                        }
                    }
                }
            }
            .instrument(debug_span!("tag_query", kind = "snapshot")),
        );
        Ok(ReceiverStream::new(rx))
    }

    /// Spawn one raw-driven task per distinct identifier.
    ///
    /// Processors are built before any task starts so that a construction
    /// error still rejects the whole call.
    fn spawn_raw_jobs<P, F>(
        &self,
        kind: &'static str,
        tag_ids: &[String],
        read: RawRead,
        cancel: CancellationToken,
        mut make: F,
    ) -> HistResult<QueryStream<P::Output>>
    where
        P: RawProcessor,
        F: FnMut() -> HistResult<P>,
    {
        let raw = self.caps.require_raw()?;
        let mut jobs = Vec::new();
        for identifier in dedup_identifiers(tag_ids) {
            jobs.push((identifier, make()?));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let sink = QuerySink::new(tx, CancelScope::new(cancel, self.shutdown.clone()));
        for (identifier, processor) in jobs {
            let sink = sink.clone();
            let resolver = self.caps.resolver.clone();
            let raw = raw.clone();
            let span = debug_span!("tag_query", kind, tag = %identifier);
            tokio::spawn(
                async move {
                    let tag = match resolve_or_skip(resolver.as_ref(), &sink, &identifier).await {
                        Ok(Some(tag)) => tag,
                        Ok(None) | Err(Stopped) => return,
                    };
                    if drive(raw, tag, read, processor, &sink).await.is_err() {
                        debug!("Tag query stopped before completion");
                    }
                }
                .instrument(span),
            );
        }
        Ok(ReceiverStream::new(rx))
    }
}

/// Resolve an identifier. Unknown tags yield `Ok(None)`; a failing resolver
/// is reported as a fault for that identifier.
async fn resolve_or_skip<T: Send + 'static>(
    resolver: &dyn TagResolver,
    sink: &QuerySink<T>,
    identifier: &str,
) -> Result<Option<Tag>, Stopped> {
    let resolved = tokio::select! {
        biased;
        _ = sink.stopped() => return Err(Stopped),
        resolved = resolver.resolve_tag(identifier) => resolved,
    };
    match resolved {
        Ok(Some(tag)) => Ok(Some(tag)),
        Ok(None) => {
            debug!(tag = identifier, "Skipping unknown tag");
            Ok(None)
        }
        Err(e) => {
            sink.fault(identifier, HistError::source_unavailable(identifier, e))
                .await?;
            Ok(None)
        }
    }
}

/// Pull raw samples through `processor` until it is done, the source ends,
/// fails, or the query is stopped.
async fn drive<P: RawProcessor>(
    raw: Arc<dyn RawHistory>,
    tag: Tag,
    read: RawRead,
    mut processor: P,
    sink: &QuerySink<P::Output>,
) -> Result<(), Stopped> {
    let opened = tokio::select! {
        biased;
        _ = sink.stopped() => return Err(Stopped),
        opened = raw.read_raw(&tag.id, read, sink.scope().clone()) => opened,
    };
    let mut samples = match opened {
        Ok(samples) => samples,
        Err(e) => {
            return sink
                .fault(&tag.id, HistError::source_unavailable(tag.id.as_str(), e))
                .await
        }
    };

    while !processor.is_done() {
        let next = tokio::select! {
            biased;
            _ = sink.stopped() => return Err(Stopped),
            next = samples.next() => next,
        };
        let sample = match next {
            None => break,
            Some(Ok(sample)) => sample,
            // Buckets still open are incomplete and are never emitted
            Some(Err(e)) => {
                return sink
                    .fault(&tag.id, HistError::source_unavailable(tag.id.as_str(), e))
                    .await
            }
        };
        loop {
            let offer = processor.offer(&sample);
            sink.emit_all(&tag.id, offer.output).await?;
            if !offer.retry {
                break;
            }
        }
    }
    drop(samples);

    while let Some(batch) = processor.drain() {
        sink.emit_all(&tag.id, batch).await?;
    }
    Ok(())
}

/// Collect a finished query stream into `(tag_id, value)` pairs and faults.
///
/// Convenience for callers that want the whole result in memory.
pub async fn collect_events<T>(
    mut stream: QueryStream<T>,
) -> (Vec<(String, T)>, Vec<(String, HistError)>) {
    let mut values = Vec::new();
    let mut faults = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            QueryEvent::Value { tag_id, value } => values.push((tag_id, value)),
            QueryEvent::Fault { tag_id, error } => faults.push((tag_id, error)),
        }
    }
    (values, faults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hist_core::DataType;
    use hist_driver_mock::MockHistorian;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_tag_is_skipped_and_logged() {
        let mock = Arc::new(MockHistorian::new("unit"));
        mock.add_tag(Tag::new("A", "Alpha", DataType::Float64));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        mock.append_samples("A", [Sample::good(t0, 1.0)]).unwrap();

        let query = HistoricalQuery::new(
            mock.capabilities(),
            QueryLimits::default(),
            8,
            CancellationToken::new(),
        );
        let request = RawQueryRequest {
            tag_ids: vec!["A".into(), "missing".into()],
            utc_start_time: t0,
            utc_end_time: t0 + chrono::Duration::seconds(1),
            boundary_type: BoundaryType::Inside,
            sample_count_limit_per_tag: 0,
        };
        let (values, faults) =
            collect_events(query.query_raw(&request, CancellationToken::new()).unwrap()).await;

        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0, "A");
        assert!(faults.is_empty());
        assert!(logs_contain("Skipping unknown tag"));
    }
}
