//! `hist-server`
//!
//! Hosts one adapter: the historical query façade, the subscription
//! registry with its reaper, and the topic fan-out fed either by the
//! adapter's native push stream or by the polling bridge.
//!
//! ```rust,ignore
//! let config = HistorianConfig::load_from("historian.toml")?;
//! init_tracing(&config.log_level, config.log_json)?;
//! let historian = Historian::start(adapter.capabilities(), config).await?;
//! let mut sub = historian.subscribe("conn-1", &["TIC-101".into()]).await?;
//! while let Some(update) = sub.updates.next().await {
//!     println!("{} = {:?}", update.tag_id, update.sample.value);
//! }
//! historian.shutdown().await;
//! ```

pub mod config;
pub mod historian;
pub mod logging;

pub use config::{HistorianConfig, QueryConfig, RealtimeConfig};
pub use historian::{Historian, SubscriptionHandle};
pub use logging::init_tracing;
