//! Load publisher for the aggregator.
//!
//! Generates unique events, mixes in a share of exact duplicates, shuffles
//! them and posts them to `/publish` in batches.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use aggregator::Event;
use aggregator::config::parse_duration;
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde_json::{Map, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Event publisher
#[derive(Parser, Debug)]
#[command(name = "publisher", version, about, long_about = None)]
struct Cli {
    /// Publish endpoint
    #[arg(
        long,
        default_value = "http://localhost:8080/publish",
        env = "AGGREGATOR_URL"
    )]
    url: String,

    /// Number of unique events
    #[arg(long, default_value_t = 20_000)]
    total: usize,

    /// Events per request
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    batch: u64,

    /// Share of unique events sent a second time (0.0 - 1.0)
    #[arg(long, default_value_t = 0.30)]
    dup_rate: f64,

    /// Number of topics to spread events over
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    topics: u32,

    /// Pause between requests
    #[arg(long, default_value = "10ms", value_parser = parse_duration)]
    delay: Duration,
}

/// Build the shuffled event stream: `total` unique events plus
/// `total * dup_rate` resent copies.
fn make_events(total: usize, dup_rate: f64, topics: u32) -> Vec<Event> {
    let mut rng = rand::rng();

    let mut events: Vec<Event> = (0..total)
        .map(|seq| {
            let mut payload = Map::new();
            payload.insert("seq".to_string(), json!(seq));
            payload.insert("value".to_string(), json!(rng.random_range(20.0..35.0)));
            Event::new(
                format!("topic-{}", rng.random_range(1..=topics)),
                uuid::Uuid::new_v4().to_string(),
                Utc::now(),
                "publisher-service",
                payload,
            )
        })
        .collect();

    let duplicates = (total as f64 * dup_rate.clamp(0.0, 1.0)) as usize;
    let resent: Vec<Event> = events
        .choose_multiple(&mut rng, duplicates)
        .cloned()
        .collect();
    events.extend(resent);
    events.shuffle(&mut rng);
    events
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(
        total = cli.total,
        dup_rate = cli.dup_rate,
        topics = cli.topics,
        "Generating events"
    );
    let events = make_events(cli.total, cli.dup_rate, cli.topics);
    let batches: Vec<&[Event]> = events.chunks(cli.batch as usize).collect();

    tracing::info!(
        events = events.len(),
        batches = batches.len(),
        url = %cli.url,
        "Publishing"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    let started = Instant::now();
    let mut failed = 0usize;
    for (idx, batch) in batches.iter().enumerate() {
        let n = idx + 1;
        match client.post(&cli.url).json(batch).send().await {
            Ok(resp) if resp.status().is_success() => {
                if n % 10 == 0 {
                    tracing::info!(batch = n, of = batches.len(), "Batch sent");
                }
            }
            Ok(resp) => {
                failed += 1;
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(batch = n, %status, body = %body, "Batch rejected");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(batch = n, error = %e, "Batch failed");
            }
        }
        tokio::time::sleep(cli.delay).await;
    }

    tracing::info!(
        batches = batches.len(),
        failed,
        elapsed = ?started.elapsed(),
        "Done"
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
