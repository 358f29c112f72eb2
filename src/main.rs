//! mct CLI
//!
//! Drives a simulated telemetry source through a subscription into a
//! bounded collection, or indexes a synthetic object tree and searches it.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mct_telemetry::config::{generate_default_config, Config, LoggingConfig};
use mct_telemetry::search::{IndexableObject, InMemoryProvider, SearchIndexCoordinator};
use mct_telemetry::subscription::{
    DomainObject, LocalSource, StaticGroup, SubscribeOptions, TelemetryMetadata,
    TelemetrySubscriptionManager,
};
use mct_telemetry::telemetry::{TelemetryCollection, TelemetryPoint, TimeBounds, TimeConductor};
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SUBSYSTEMS: [&str; 4] = ["Power", "Thermal", "Propulsion", "Comms"];
const MEASUREMENTS: [&str; 4] = ["Temperature", "Voltage", "Current", "Pressure"];

#[derive(Parser)]
#[command(name = "mct")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Telemetry subscription, collection and search toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config_dir>/mct/config.toml, then ./mct.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a simulated sine source into a bounded collection
    Stream {
        /// Number of points to emit
        #[arg(short, long, default_value = "200")]
        points: usize,
        /// Milliseconds between points
        #[arg(long, default_value = "10")]
        period_ms: u64,
        /// Width of the time window in milliseconds
        #[arg(short, long, default_value = "1000")]
        window_ms: f64,
        /// Deliver every point instead of the latest per flush
        #[arg(long)]
        lossless: bool,
    },

    /// Index a synthetic object tree and run a query
    Search {
        /// Query text
        query: String,
        /// Depth of the object tree
        #[arg(short, long, default_value = "2")]
        depth: usize,
        /// Maximum number of hits (default: from config)
        #[arg(short, long)]
        max_results: Option<usize>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load_default(),
    };

    init_logging(&config.logging);
    tracing::debug!("mct v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Stream {
            points,
            period_ms,
            window_ms,
            lossless,
        } => run_stream(&config, points, period_ms, window_ms, lossless).await,
        Commands::Search {
            query,
            depth,
            max_results,
        } => {
            let max_results = max_results.unwrap_or(config.search.default_max_results);
            run_search(&config, &query, depth, max_results).await
        }
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mct_telemetry={0},mct={0}", config.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_stream(
    config: &Config,
    points: usize,
    period_ms: u64,
    window_ms: f64,
    lossless: bool,
) -> anyhow::Result<()> {
    let domain_key = config.collection.domain_key.clone();
    let source = Arc::new(LocalSource::new(
        "sim:sine",
        TelemetryMetadata::new(domain_key.clone(), "value"),
    ));
    let group = StaticGroup::new("sim:spacecraft", vec![DomainObject::Direct(source.clone())]);

    let collection = Arc::new(RwLock::new(TelemetryCollection::with_config(&config.collection)));
    collection.write().await.on_discarded(|discarded| {
        tracing::debug!(count = discarded.len(), "Points left the window");
    });

    let now = Utc::now().timestamp_millis() as f64;
    let conductor = TimeConductor::new(TimeBounds::new(now - window_ms, now)?);
    let follower = conductor.follow(Arc::clone(&collection));

    // Frames are forwarded to an ingest task so the flush task never waits on the collection
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<TelemetryPoint>>();
    let sink = Arc::clone(&collection);
    let ingest = tokio::spawn(async move {
        let mut frames = 0usize;
        while let Some(batch) = frames_rx.recv().await {
            frames += 1;
            sink.write().await.add(batch);
        }
        frames
    });

    let manager = TelemetrySubscriptionManager::new(config.subscription.clone());
    let options = SubscribeOptions {
        lossless: lossless || config.subscription.lossless,
    };
    let subscription = manager
        .subscribe(
            DomainObject::Delegating(Arc::new(group)),
            move |frame| {
                let _ = frames_tx.send(frame.values().cloned().collect());
            },
            options,
        )
        .await?;

    tracing::info!(
        points,
        period_ms,
        window_ms,
        lossless = options.lossless,
        "Streaming simulated telemetry"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
    for i in 0..points {
        ticker.tick().await;
        let utc = Utc::now().timestamp_millis();
        source.emit(
            TelemetryPoint::new()
                .with(domain_key.as_str(), utc)
                .with("value", (i as f64 * 0.1).sin()),
        );
        conductor.set_bounds(TimeBounds::new(utc as f64 - window_ms, utc as f64)?);
    }

    // Let the last flush land
    tokio::time::sleep(Duration::from_millis(config.subscription.flush_interval_ms + 20)).await;

    let sources = subscription.telemetry_objects().await;
    let latest = subscription.get_range_value("sim:sine").await;
    subscription.unsubscribe().await;
    manager.shutdown().await;
    follower.abort();

    let frames = ingest.await.context("Ingest task failed")?;
    let collection = collection.read().await;

    println!("Sources:        {}", sources.join(", "));
    println!("Frames:         {}", frames);
    println!("In window:      {}", collection.len());
    println!("High buffer:    {}", collection.high_buffer().len());
    if let Some(bounds) = collection.current_bounds() {
        println!(
            "Bounds:         {:.0} .. {:.0} ({:.0} ms)",
            bounds.start,
            bounds.end,
            bounds.duration()
        );
    }
    if let Some(value) = latest {
        println!("Latest value:   {}", value);
    }

    Ok(())
}

async fn run_search(
    config: &Config,
    query: &str,
    depth: usize,
    max_results: usize,
) -> anyhow::Result<()> {
    let provider = Arc::new(InMemoryProvider::new());
    let objects = build_object_tree(&provider, depth).await;
    tracing::info!(objects, depth, "Built synthetic object tree");

    let coordinator = SearchIndexCoordinator::spawn(provider, &config.search)?;
    coordinator.schedule_for_indexing("root").await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.search.query_timeout_ms);
    while coordinator.pending_count().await > 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Indexing did not finish before the deadline");
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let results = coordinator.query(query, max_results).await?;
    coordinator.shutdown().await;

    println!(
        "{} of {} objects matched \"{}\"{}",
        results.total,
        objects,
        query,
        if results.timed_out { " (timed out)" } else { "" }
    );
    for hit in &results.hits {
        let name = hit.model.get("name").and_then(|v| v.as_str()).unwrap_or("");
        println!("{:>4}  {:<32}  {}", hit.score, hit.id, name);
    }

    Ok(())
}

/// Populate `provider` with a tree of subsystems and measurements
///
/// Returns the number of objects created.
async fn build_object_tree(provider: &InMemoryProvider, depth: usize) -> usize {
    let mut queue = VecDeque::from([("root".to_string(), "Spacecraft".to_string(), 0usize)]);
    let mut created = 0;

    while let Some((id, name, level)) = queue.pop_front() {
        let mut children = Vec::new();

        if level < depth {
            let labels: &[&str] = if level + 1 == depth {
                &MEASUREMENTS
            } else {
                &SUBSYSTEMS
            };
            for label in labels {
                let child_id = format!("{}:{}", id, label.to_lowercase());
                let child_name = if level == 0 {
                    label.to_string()
                } else {
                    format!("{} {}", name, label)
                };
                children.push(child_id.clone());
                queue.push_back((child_id, child_name, level + 1));
            }
        }

        let kind = if children.is_empty() { "telemetry" } else { "folder" };
        provider
            .insert(
                IndexableObject::new(id, json!({ "name": name, "type": kind }))
                    .with_children(children),
            )
            .await;
        created += 1;
    }

    created
}
