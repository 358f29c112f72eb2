//! Object Search
//!
//! Background full-text index over object models.
//!
//! ## Architecture
//!
//! - **SearchWorker**: Owns the index on its own thread; speaks
//!   [`WorkerRequest`] / [`WorkerResponse`] messages
//! - **SearchIndexCoordinator**: Crawls object compositions with bounded
//!   concurrency and routes query results back to callers by query id
//! - **ObjectProvider**: Where the coordinator fetches objects from
//!
//! ## Example
//!
//! ```rust,no_run
//! use mct_telemetry::config::SearchConfig;
//! use mct_telemetry::search::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), SearchError> {
//! let provider = Arc::new(InMemoryProvider::new());
//! provider
//!     .insert(IndexableObject::new("sensor", json!({ "name": "Battery Temperature" })))
//!     .await;
//!
//! let coordinator = SearchIndexCoordinator::spawn(provider, &SearchConfig::default())?;
//! coordinator.schedule_for_indexing("sensor").await;
//!
//! let results = coordinator.query("battery", 10).await?;
//! println!("{} matches", results.total);
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod error;
mod messages;
mod worker;

pub use coordinator::{
    IndexState, IndexableObject, InMemoryProvider, ObjectMutation, ObjectProvider,
    SearchIndexCoordinator,
};
pub use error::{SearchError, SearchResult};
pub use messages::{QueryId, SearchHit, SearchResults, WorkerRequest, WorkerResponse};
pub use worker::{IndexEntry, SearchIndex, SearchOutcome, SearchWorker};
