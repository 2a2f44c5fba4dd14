//! Cancellation-aware output side of a query task.

use crate::event::QueryEvent;
use hist_core::{CancelScope, HistError};
use tokio::sync::mpsc;
use tracing::warn;

/// The task must stop: the scope was cancelled or the consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stopped;

/// Bounded sender shared by the tasks of one query.
pub(crate) struct QuerySink<T> {
    tx: mpsc::Sender<QueryEvent<T>>,
    scope: CancelScope,
}

impl<T> Clone for QuerySink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<T: Send + 'static> QuerySink<T> {
    pub(crate) fn new(tx: mpsc::Sender<QueryEvent<T>>, scope: CancelScope) -> Self {
        Self { tx, scope }
    }

    pub(crate) fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Completes when the scope is cancelled or the receiver is dropped.
    pub(crate) async fn stopped(&self) {
        tokio::select! {
            _ = self.scope.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Emit one value, waiting for buffer space (backpressure).
    pub(crate) async fn emit(&self, tag_id: &str, value: T) -> Result<(), Stopped> {
        self.send(QueryEvent::Value {
            tag_id: tag_id.to_string(),
            value,
        })
        .await
    }

    /// Emit a batch, checking cancellation before each element.
    pub(crate) async fn emit_all(&self, tag_id: &str, values: Vec<T>) -> Result<(), Stopped> {
        for value in values {
            self.emit(tag_id, value).await?;
        }
        Ok(())
    }

    /// Report a per-tag fault.
    pub(crate) async fn fault(&self, tag_id: &str, error: HistError) -> Result<(), Stopped> {
        warn!(tag = tag_id, error = %error, "Query source fault");
        self.send(QueryEvent::Fault {
            tag_id: tag_id.to_string(),
            error,
        })
        .await
    }

    async fn send(&self, event: QueryEvent<T>) -> Result<(), Stopped> {
        if self.scope.is_cancelled() {
            return Err(Stopped);
        }
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(Stopped),
            sent = self.tx.send(event) => sent.map_err(|_| Stopped),
        }
    }
}
