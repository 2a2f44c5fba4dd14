//! CLI Entry Point for rust-historian
//!
//! Provides command-line access to:
//! - A self-contained demo over the in-memory mock adapter
//! - The aggregate function descriptor table
//!
//! # Usage
//!
//! ```bash
//! historian demo --tags 3 --seconds 5
//! historian demo --config historian.toml
//! historian functions
//! ```

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use hist_core::{AggregationRequest, DataType, Sample, Tag};
use hist_driver_mock::{MockHistorian, SyntheticSeries, Waveform};
use hist_processing::AGGREGATE_FUNCTIONS;
use hist_query::QueryEvent;
use hist_server::{init_tracing, Historian, HistorianConfig};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Seconds of synthetic history generated per demo tag.
const DEMO_HISTORY_SECS: usize = 600;

#[derive(Parser)]
#[command(name = "historian")]
#[command(about = "Tag value historian: aggregation and live subscriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query and subscribe against a mock adapter with synthetic data
    Demo {
        /// Configuration file (TOML); HISTORIAN_* variables still apply
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of synthetic tags
        #[arg(long, default_value_t = 3)]
        tags: usize,
        /// How long to stream live updates
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print the supported aggregate functions as JSON
    Functions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            config,
            tags,
            seconds,
        } => run_demo(config, tags, seconds).await,
        Commands::Functions => {
            println!("{}", serde_json::to_string_pretty(&AGGREGATE_FUNCTIONS)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<HistorianConfig> {
    let config = match &path {
        Some(path) => HistorianConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HistorianConfig::from_env().context("loading configuration from environment")?,
    };
    Ok(config)
}

fn demo_adapter(tags: usize) -> Result<Arc<MockHistorian>> {
    let mock = Arc::new(MockHistorian::new("demo").with_seed(42));
    let start = Utc::now() - TimeDelta::seconds(DEMO_HISTORY_SECS as i64);
    for i in 0..tags {
        let id = format!("TAG-{i:03}");
        mock.add_tag(Tag::new(&id, format!("Demo Signal {i}"), DataType::Float64).with_units("degC"));
        let series = SyntheticSeries {
            waveform: Waveform::Sine {
                amplitude: 10.0,
                period_secs: 120.0,
                offset: 50.0 + 5.0 * i as f64,
            },
            noise: 0.5,
            bad_rate: 0.02,
        };
        mock.append_synthetic(&id, &series, start, TimeDelta::seconds(1), DEMO_HISTORY_SECS)?;
    }
    Ok(mock)
}

/// Append one fresh sample per tag every `period` until cancelled.
fn spawn_live_writer(
    mock: Arc<MockHistorian>,
    tag_ids: Vec<String>,
    period: Duration,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut step = 0.0;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            step += 1.0;
            for (i, id) in tag_ids.iter().enumerate() {
                let value = 50.0 + 5.0 * i as f64 + step * 0.1;
                if let Err(e) = mock.append_samples(id, [Sample::good(Utc::now(), value)]) {
                    warn!(tag = %id, error = %e, "Live writer append failed");
                }
            }
        }
    });
}

async fn run_demo(config: Option<PathBuf>, tags: usize, seconds: u64) -> Result<()> {
    let config = load_config(config)?;
    init_tracing(&config.log_level, config.log_json)?;
    let poll_interval = config.realtime.poll_interval;

    let mock = demo_adapter(tags.max(1))?;
    let historian = Historian::start(mock.capabilities(), config)
        .await
        .context("starting historian")?;
    let tag_ids: Vec<String> = (0..tags.max(1)).map(|i| format!("TAG-{i:03}")).collect();

    // Aggregated history
    let now = Utc::now();
    let request = AggregationRequest {
        tag_ids: tag_ids.clone(),
        function_ids: vec!["AVG".into(), "MIN".into(), "MAX".into(), "COUNT".into()],
        utc_start_time: now - TimeDelta::seconds(DEMO_HISTORY_SECS as i64),
        utc_end_time: now,
        sample_interval: Duration::from_secs(60),
    };
    let mut buckets = historian.query_aggregated(&request, CancellationToken::new())?;
    while let Some(event) = buckets.next().await {
        match event {
            QueryEvent::Value { tag_id, value } => {
                println!("{}", json!({ "tag": tag_id, "bucket": value }))
            }
            QueryEvent::Fault { tag_id, error } => eprintln!("query fault on {tag_id}: {error}"),
        }
    }

    // Live updates
    let stop = CancellationToken::new();
    spawn_live_writer(mock.clone(), tag_ids.clone(), poll_interval, stop.clone());
    let mut subscription = historian.subscribe("demo-cli", &tag_ids).await?;
    info!(subscription = %subscription.id, seconds, "Streaming live updates");

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            update = subscription.updates.next() => match update {
                Some(update) => println!("{}", json!({ "update": update })),
                None => break,
            },
        }
    }

    stop.cancel();
    historian.unsubscribe("demo-cli", subscription.id);
    println!(
        "{}",
        json!({
            "polling": historian.polling_stats(),
            "fanout": historian.fanout_stats().await,
        })
    );
    historian.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_arguments() {
        let cli = Cli::try_parse_from(["historian", "demo", "--tags", "2", "--seconds", "1"])
            .unwrap();
        match cli.command {
            Commands::Demo {
                config,
                tags,
                seconds,
            } => {
                assert!(config.is_none());
                assert_eq!(tags, 2);
                assert_eq!(seconds, 1);
            }
            Commands::Functions => panic!("expected demo"),
        }
    }

    #[test]
    fn test_demo_adapter_history() {
        let mock = demo_adapter(2).unwrap();
        assert_eq!(mock.history("TAG-001").len(), DEMO_HISTORY_SECS);
        assert_eq!(mock.history("demo signal 0").len(), DEMO_HISTORY_SECS);
    }
}
