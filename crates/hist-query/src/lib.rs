//! `hist-query`
//!
//! Historical query façade: batch raw, aggregated, plot, values-at-times and
//! snapshot queries against one adapter, one concurrent task per tag,
//! results streamed back through a single bounded channel.
//!
//! ```rust,ignore
//! let query = HistoricalQuery::new(caps, QueryLimits::default(), 256, shutdown);
//! let mut buckets = query.query_aggregated(&request, CancellationToken::new())?;
//! while let Some(event) = buckets.next().await {
//!     match event {
//!         QueryEvent::Value { tag_id, value } => println!("{tag_id}: {:?}", value.result),
//!         QueryEvent::Fault { tag_id, error } => eprintln!("{tag_id}: {error}"),
//!     }
//! }
//! ```

mod event;
mod facade;
mod processor;
mod sink;

pub use event::{QueryEvent, QueryStream};
pub use facade::{collect_events, HistoricalQuery};
