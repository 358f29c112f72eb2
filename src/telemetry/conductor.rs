//! Time Conductor - source of the active time bounds
//!
//! Publishes bounds changes to any number of listeners through a tokio
//! watch channel. Listeners only ever see the latest bounds; intermediate
//! values set between two reads are skipped.

use crate::telemetry::collection::TelemetryCollection;
use crate::telemetry::types::TimeBounds;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Holds the current bounds and notifies followers when they change
#[derive(Debug)]
pub struct TimeConductor {
    tx: watch::Sender<TimeBounds>,
}

impl TimeConductor {
    pub fn new(initial: TimeBounds) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Current bounds
    pub fn bounds(&self) -> TimeBounds {
        *self.tx.borrow()
    }

    /// Replace the bounds and notify followers
    pub fn set_bounds(&self, bounds: TimeBounds) {
        self.tx.send_replace(bounds);
        tracing::debug!(start = bounds.start, end = bounds.end, "Time bounds changed");
    }

    /// Shift the window forward by `delta`
    pub fn advance(&self, delta: f64) -> TimeBounds {
        let next = self.bounds().advance(delta);
        self.set_bounds(next);
        next
    }

    /// Receiver for bounds-change notifications
    pub fn watch(&self) -> watch::Receiver<TimeBounds> {
        self.tx.subscribe()
    }

    /// Drive a collection's bounds from this conductor
    ///
    /// Applies the current bounds immediately, then every change until the
    /// conductor is dropped or the returned task is aborted.
    pub fn follow(&self, collection: Arc<RwLock<TelemetryCollection>>) -> JoinHandle<()> {
        let mut rx = self.watch();

        tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            collection.write().await.bounds(initial);

            while rx.changed().await.is_ok() {
                let bounds = *rx.borrow_and_update();
                collection.write().await.bounds(bounds);
            }

            tracing::trace!("Time conductor dropped, collection no longer follows");
        })
    }
}
