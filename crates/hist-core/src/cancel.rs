//! Cooperative cancellation for streaming operations.
//!
//! Every streaming operation runs under a [`CancelScope`] combining two
//! signals: the caller's own token (fired on client disconnect) and the
//! hosting adapter's shutdown token. The operation keeps running only while
//! *both* are live; either one firing stops it.
//!
//! Cancellation is a normal termination, not an error: producers check
//! [`CancelScope::is_cancelled`] before each raw read and each emission and
//! simply return.

use tokio_util::sync::CancellationToken;

/// Caller cancellation combined with adapter shutdown.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    caller: CancellationToken,
    shutdown: CancellationToken,
}

impl CancelScope {
    /// Combine a caller token with the adapter shutdown token.
    pub fn new(caller: CancellationToken, shutdown: CancellationToken) -> Self {
        Self { caller, shutdown }
    }

    /// Scope that is only cancelled through the returned tokens.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether either signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.caller.is_cancelled() || self.shutdown.is_cancelled()
    }

    /// Completes as soon as either signal fires.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.caller.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// The caller's token.
    pub fn caller(&self) -> &CancellationToken {
        &self.caller
    }

    /// The adapter shutdown token.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}
