//! Telemetry Core
//!
//! This module provides the in-memory side of telemetry display:
//!
//! - **types**: Core data structures (TelemetryPoint, TimeBounds, SortConfiguration)
//! - **collection**: Sorted, bounded per-source collection with a high buffer
//! - **queue**: Lossless queue and lossy table used to coalesce updates
//! - **conductor**: Publishes time bounds changes to collections
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust
//! use mct_telemetry::telemetry::{SortOrder, TelemetryCollection, TelemetryPoint, TimeBounds};
//!
//! let mut collection = TelemetryCollection::new("utc");
//! collection.sort("utc", SortOrder::Ascending);
//! collection.bounds(TimeBounds::new(0.0, 10_000.0).unwrap());
//!
//! collection.on_added(|points| println!("{} points added", points.len()));
//! collection.add(vec![
//!     TelemetryPoint::new().with("utc", 2_000).with("value", 1.5),
//!     TelemetryPoint::new().with("utc", 12_000).with("value", 2.5),
//! ]);
//!
//! assert_eq!(collection.len(), 1);
//! assert_eq!(collection.high_buffer().len(), 1);
//! ```

pub mod collection;
pub mod conductor;
pub mod error;
pub mod queue;
pub mod types;

pub use collection::{Listener, ListenerId, TelemetryCollection};
pub use conductor::TimeConductor;
pub use error::{TelemetryError, TelemetryResult};
pub use queue::{TelemetryFrame, TelemetryPool, TelemetryQueue, TelemetryTable};
pub use types::{compare_keys, compare_values, SortConfiguration, SortOrder, TelemetryPoint, TimeBounds};
