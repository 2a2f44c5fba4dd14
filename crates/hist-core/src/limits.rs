//! Shared hard limits and defaults.
//!
//! This module centralizes:
//! - Request size limits (tags per batch, intervals per request)
//! - Channel capacities for query and subscription streams
//! - Timing defaults for the polling bridge and connection reaper
//!
//! The service configuration starts from these values; keeping them in one
//! place makes tuning easier.

use std::time::Duration;

// =============================================================================
// Request Limits
// =============================================================================

/// Maximum number of tags accepted in one batch request (default: 1000).
pub const MAX_TAGS_PER_REQUEST: usize = 1000;

/// Maximum number of aggregation intervals (or plot intervals) per request.
pub const MAX_INTERVALS_PER_REQUEST: u64 = 1_000_000;

// =============================================================================
// Channel Capacities
// =============================================================================

/// Bound of every query output channel.
///
/// A consumer that stops reading suspends the per-tag producers once this
/// many elements are queued.
pub const DEFAULT_QUERY_CHANNEL_CAPACITY: usize = 256;

/// Buffer of each topic channel. Writes beyond it are dropped, not awaited.
pub const DEFAULT_TOPIC_CHANNEL_CAPACITY: usize = 64;

/// Buffer of the merged per-subscription output stream.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

/// Number of fan-out owner tasks topics are sharded across.
pub const DEFAULT_FANOUT_SHARDS: usize = 4;

// =============================================================================
// Timing
// =============================================================================

/// Period of the polling push bridge (1 second).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Idle time after which a connection is considered stale (30 seconds).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Period of the stale-connection reaper scan (5 seconds).
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Time allowed for background tasks to stop during shutdown (2 seconds).
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request limits enforced during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Maximum number of tags per batch.
    pub max_tags: usize,
    /// Maximum number of intervals per aggregation or plot request.
    pub max_intervals: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_tags: MAX_TAGS_PER_REQUEST,
            max_intervals: MAX_INTERVALS_PER_REQUEST,
        }
    }
}
