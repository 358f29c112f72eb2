//! Telemetry Subscriptions
//!
//! Live subscriptions to the telemetry behind a domain object.
//!
//! ## Architecture
//!
//! - **DomainObject**: Direct source or delegating object, resolved once
//! - **TelemetrySubscriptionManager**: Opens one subscription per source
//!   and coalesces updates into a single callback
//! - **TelemetrySubscription**: Handle exposing resolved sources, latest
//!   values, and `unsubscribe`
//!
//! ## Example
//!
//! ```rust,no_run
//! use mct_telemetry::subscription::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), SubscriptionError> {
//! let source = Arc::new(LocalSource::new("sine", TelemetryMetadata::default()));
//! let manager = TelemetrySubscriptionManager::default();
//!
//! let subscription = manager
//!     .subscribe(
//!         DomainObject::Direct(source.clone()),
//!         |frame| println!("{} sources updated", frame.len()),
//!         SubscribeOptions::lossy(),
//!     )
//!     .await?;
//!
//! println!("sources: {:?}", subscription.telemetry_objects().await);
//! subscription.unsubscribe().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod manager;
mod source;

pub use error::SubscriptionError;
pub use manager::{
    FrameCallback, LatestValue, SubscribeOptions, SubscriptionId, TelemetrySubscription,
    TelemetrySubscriptionManager,
};
pub use source::{
    DatumCallback, DelegatingSource, DomainObject, LocalSource, StaticGroup, TelemetryMetadata,
    TelemetrySource, UnsubscribeFn,
};
