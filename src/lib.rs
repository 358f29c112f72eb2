//! # mct-telemetry
//!
//! Telemetry plumbing for mission control displays: bounded, sorted
//! telemetry collections, coalescing live subscriptions, and a background
//! object search index.
//!
//! ## Modules
//!
//! - [`telemetry`]: Sorted collections with time bounds, queues, time conductor
//! - [`subscription`]: Subscriptions to direct and delegated telemetry sources
//! - [`search`]: Search worker and indexing coordinator
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mct_telemetry::*;
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, RwLock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     // One collection per source, following the time conductor
//!     let collection = Arc::new(RwLock::new(TelemetryCollection::with_config(&config.collection)));
//!     let conductor = TimeConductor::new(TimeBounds::new(0.0, 60_000.0)?);
//!     let follower = conductor.follow(Arc::clone(&collection));
//!
//!     // Frames go through a channel to an ingest task that owns the writes
//!     let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<TelemetryPoint>>();
//!     let sink = Arc::clone(&collection);
//!     let ingest = tokio::spawn(async move {
//!         while let Some(points) = frames_rx.recv().await {
//!             sink.write().await.add(points);
//!         }
//!     });
//!
//!     let source = Arc::new(LocalSource::new("sine", TelemetryMetadata::default()));
//!     let manager = TelemetrySubscriptionManager::new(config.subscription.clone());
//!     let subscription = manager
//!         .subscribe(
//!             DomainObject::Direct(source.clone()),
//!             move |frame| {
//!                 let _ = frames_tx.send(frame.values().cloned().collect());
//!             },
//!             manager.default_options(),
//!         )
//!         .await?;
//!
//!     source.emit(TelemetryPoint::new().with("utc", 1_000).with("value", 0.5));
//!
//!     subscription.unsubscribe().await;
//!     ingest.await?;
//!     follower.abort();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod search;
pub mod subscription;
pub mod telemetry;

// Re-export top-level types for convenience
pub use telemetry::{
    SortConfiguration, SortOrder, TelemetryCollection, TelemetryError, TelemetryFrame,
    TelemetryPoint, TelemetryPool, TelemetryQueue, TelemetryResult, TelemetryTable,
    TimeBounds, TimeConductor,
};

pub use subscription::{
    DelegatingSource, DomainObject, LocalSource, StaticGroup, SubscribeOptions,
    SubscriptionError, TelemetryMetadata, TelemetrySource, TelemetrySubscription,
    TelemetrySubscriptionManager,
};

pub use search::{
    IndexState, IndexableObject, InMemoryProvider, ObjectMutation, ObjectProvider,
    SearchError, SearchIndexCoordinator, SearchResults, SearchWorker,
};

pub use config::{
    CollectionConfig, Config, ConfigError, LoggingConfig, SearchConfig, SubscriptionConfig,
};
