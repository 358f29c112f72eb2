//! Telemetry Subscription Manager
//!
//! Observes a domain object by subscribing to every telemetry source behind
//! it and fanning their updates in to one callback.
//!
//! # Flow
//!
//! ```text
//! subscribe(object) ──► resolve task ──► source.subscribe() × N
//!                                             │ (any thread)
//!                                             ▼
//!                                    mpsc channel per subscription
//!                                             │
//!                     flush task: first arrival → wait one tick → drain
//!                                             │
//!                         pool (queue | table) ──► callback(frame)
//! ```
//!
//! The callback never runs inside a source's emit call. In lossy mode it
//! runs at most once per tick with the latest point of each source; in
//! lossless mode once per queued frame, so no point is skipped.

use crate::config::SubscriptionConfig;
use crate::subscription::error::SubscriptionError;
use crate::subscription::source::{
    DatumCallback, DomainObject, TelemetryMetadata, UnsubscribeFn,
};
use crate::telemetry::{TelemetryFrame, TelemetryPoint, TelemetryPool};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Unique identifier for a subscription
pub type SubscriptionId = Uuid;

/// Callback receiving each flushed frame
pub type FrameCallback = Box<dyn FnMut(&TelemetryFrame) + Send>;

type Registry = Arc<RwLock<HashMap<SubscriptionId, Arc<SubscriptionShared>>>>;

/// Per-subscription delivery options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliver every point instead of only the latest per tick
    pub lossless: bool,
}

impl SubscribeOptions {
    pub fn lossless() -> Self {
        Self { lossless: true }
    }

    pub fn lossy() -> Self {
        Self { lossless: false }
    }
}

impl From<&SubscriptionConfig> for SubscribeOptions {
    fn from(config: &SubscriptionConfig) -> Self {
        Self {
            lossless: config.lossless,
        }
    }
}

/// Most recent domain/range pair seen for a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestValue {
    pub domain: Option<Value>,
    pub range: Option<Value>,
}

/// Sources and latest values behind one subscription
#[derive(Default)]
struct SubscriptionSet {
    /// Resolved source ids, in resolution order
    telemetry_objects: Vec<String>,
    metadata: HashMap<String, TelemetryMetadata>,
    latest_values: HashMap<String, LatestValue>,
    /// Release handles of every opened source subscription
    unsubscribe_handles: Vec<UnsubscribeFn>,
}

impl SubscriptionSet {
    fn record(&mut self, source: &str, point: &TelemetryPoint) {
        let Some(metadata) = self.metadata.get(source) else {
            return;
        };
        let latest = LatestValue {
            domain: point.get_path(&metadata.domain_key).cloned(),
            range: point.get_path(&metadata.range_key).cloned(),
        };
        self.latest_values.insert(source.to_string(), latest);
    }
}

/// State shared between a subscription handle and its tasks
struct SubscriptionShared {
    id: SubscriptionId,
    /// Cleared on unsubscribe; checked by source callbacks and the flush task
    active: Arc<AtomicBool>,
    set: Mutex<SubscriptionSet>,
    resolved: watch::Sender<bool>,
    flush_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    registry: Registry,
}

impl SubscriptionShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn wait_resolved(&self) {
        let mut rx = self.resolved.subscribe();
        // The sender lives as long as `self`, so this only returns once resolved.
        let _ = rx.wait_for(|resolved| *resolved).await;
    }

    /// Release every source subscription once resolution has settled
    async fn release(&self) {
        self.wait_resolved().await;

        let handles = std::mem::take(&mut self.set.lock().await.unsubscribe_handles);
        let released = handles.len();
        for unsubscribe in handles {
            unsubscribe();
        }

        let flush_task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = flush_task {
            task.abort();
        }

        self.registry.write().await.remove(&self.id);

        if released > 0 {
            tracing::debug!(
                subscription_id = %self.id,
                sources = released,
                "Released telemetry subscription"
            );
        }
    }

    /// Drain the pool, updating latest values before each callback
    async fn flush(&self, pool: &mut TelemetryPool, callback: &mut FrameCallback) {
        while let Some(frame) = pool.poll() {
            {
                let mut set = self.set.lock().await;
                for (source, point) in &frame {
                    set.record(source, point);
                }
            }
            callback(&frame);
        }
    }
}

/// Handle to a live subscription
///
/// Dropping the handle without calling [`unsubscribe`](Self::unsubscribe)
/// releases the sources in the background.
pub struct TelemetrySubscription {
    shared: Arc<SubscriptionShared>,
}

impl TelemetrySubscription {
    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Ids of the resolved telemetry sources
    ///
    /// Waits for delegation to resolve, not for any data to arrive.
    pub async fn telemetry_objects(&self) -> Vec<String> {
        self.shared.wait_resolved().await;
        self.shared.set.lock().await.telemetry_objects.clone()
    }

    /// Latest domain value seen for a source
    pub async fn get_domain_value(&self, source: &str) -> Option<Value> {
        self.latest_value(source).await.and_then(|v| v.domain)
    }

    /// Latest range value seen for a source
    pub async fn get_range_value(&self, source: &str) -> Option<Value> {
        self.latest_value(source).await.and_then(|v| v.range)
    }

    pub async fn latest_value(&self, source: &str) -> Option<LatestValue> {
        self.shared.set.lock().await.latest_values.get(source).cloned()
    }

    /// Stop delivery and release every source subscription
    ///
    /// Waits for a pending delegation lookup first, so sources resolved
    /// after this call are released too. Safe to call more than once.
    pub async fn unsubscribe(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.release().await;
    }
}

impl Drop for TelemetrySubscription {
    fn drop(&mut self) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move { shared.release().await });
            }
            Err(_) => tracing::warn!(
                subscription_id = %self.shared.id,
                "Subscription dropped outside a runtime; sources not released"
            ),
        }
    }
}

impl std::fmt::Debug for TelemetrySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySubscription")
            .field("id", &self.shared.id)
            .field("active", &self.shared.is_active())
            .finish()
    }
}

/// Opens and tracks telemetry subscriptions
pub struct TelemetrySubscriptionManager {
    config: SubscriptionConfig,
    subscriptions: Registry,
    closed: AtomicBool,
}

impl TelemetrySubscriptionManager {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
        }
    }

    /// Options derived from configuration
    pub fn default_options(&self) -> SubscribeOptions {
        SubscribeOptions::from(&self.config)
    }

    /// Observe a domain object
    ///
    /// Returns immediately; delegation is resolved on a spawned task. Must
    /// be called inside a tokio runtime.
    pub async fn subscribe<F>(
        &self,
        object: DomainObject,
        callback: F,
        options: SubscribeOptions,
    ) -> Result<TelemetrySubscription, SubscriptionError>
    where
        F: FnMut(&TelemetryFrame) + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Closed);
        }

        let (resolved, _) = watch::channel(false);
        let shared = Arc::new(SubscriptionShared {
            id: Uuid::new_v4(),
            active: Arc::new(AtomicBool::new(true)),
            set: Mutex::new(SubscriptionSet::default()),
            resolved,
            flush_task: std::sync::Mutex::new(None),
            registry: Arc::clone(&self.subscriptions),
        });

        self.subscriptions
            .write()
            .await
            .insert(shared.id, Arc::clone(&shared));

        let (tx, rx) = mpsc::unbounded_channel();
        let interval = Duration::from_millis(self.config.flush_interval_ms);
        let flush = tokio::spawn(flush_loop(
            Arc::clone(&shared),
            rx,
            TelemetryPool::new(options.lossless),
            interval,
            Box::new(callback),
        ));
        *shared
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(flush);

        tracing::debug!(
            subscription_id = %shared.id,
            object = %object.id(),
            lossless = options.lossless,
            "Subscribing to telemetry"
        );

        tokio::spawn(resolve_and_subscribe(Arc::clone(&shared), object, tx));

        Ok(TelemetrySubscription { shared })
    }

    /// Number of subscriptions not yet released
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Release every open subscription and refuse new ones
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let open: Vec<Arc<SubscriptionShared>> =
            self.subscriptions.read().await.values().cloned().collect();
        for shared in open {
            shared.active.store(false, Ordering::SeqCst);
            shared.release().await;
        }

        tracing::info!("Telemetry subscription manager shut down");
    }
}

impl Default for TelemetrySubscriptionManager {
    fn default() -> Self {
        Self::new(SubscriptionConfig::default())
    }
}

/// Resolve the object's sources and open one subscription per source
async fn resolve_and_subscribe(
    shared: Arc<SubscriptionShared>,
    object: DomainObject,
    tx: mpsc::UnboundedSender<(String, TelemetryPoint)>,
) {
    let sources = object.resolve().await;

    {
        let mut set = shared.set.lock().await;
        for source in &sources {
            let source_id = source.id().to_string();
            set.telemetry_objects.push(source_id.clone());
            set.metadata.insert(source_id.clone(), source.metadata());

            let active = Arc::clone(&shared.active);
            let tx = tx.clone();
            let callback: DatumCallback = Arc::new(move |point| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                // A closed channel means the flush task is gone; drop the point.
                let _ = tx.send((source_id.clone(), point));
            });

            set.unsubscribe_handles.push(source.subscribe(callback));
        }
    }

    shared.resolved.send_replace(true);

    tracing::debug!(
        subscription_id = %shared.id,
        object = %object.id(),
        sources = sources.len(),
        "Telemetry sources resolved"
    );
}

/// Coalesce arrivals and invoke the callback at most once per tick
async fn flush_loop(
    shared: Arc<SubscriptionShared>,
    mut rx: mpsc::UnboundedReceiver<(String, TelemetryPoint)>,
    mut pool: TelemetryPool,
    interval: Duration,
    mut callback: FrameCallback,
) {
    while let Some((source, point)) = rx.recv().await {
        pool.put(&source, point);

        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }

        while let Ok((source, point)) = rx.try_recv() {
            pool.put(&source, point);
        }

        if !shared.is_active() {
            break;
        }
        shared.flush(&mut pool, &mut callback).await;
    }

    tracing::trace!(subscription_id = %shared.id, "Flush loop finished");
}
