//! Telemetry sources and domain objects
//!
//! A domain object either produces telemetry itself or delegates to other
//! objects that do (e.g. a panel of several telemetry points). The two
//! capabilities are modelled as an explicit enum and flattened into a list
//! of concrete sources once, at subscribe time.

use crate::subscription::error::SubscriptionError;
use crate::telemetry::TelemetryPoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Callback a source invokes for every new point
pub type DatumCallback = Arc<dyn Fn(TelemetryPoint) + Send + Sync>;

/// Releases one source subscription
pub type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// Which fields of a source's points hold the domain and range values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMetadata {
    pub domain_key: String,
    pub range_key: String,
}

impl TelemetryMetadata {
    pub fn new(domain_key: impl Into<String>, range_key: impl Into<String>) -> Self {
        Self {
            domain_key: domain_key.into(),
            range_key: range_key.into(),
        }
    }
}

impl Default for TelemetryMetadata {
    fn default() -> Self {
        Self::new("utc", "value")
    }
}

/// An object that directly produces telemetry
pub trait TelemetrySource: Send + Sync {
    /// Stable identifier of the source
    fn id(&self) -> &str;

    /// Domain/range field names
    fn metadata(&self) -> TelemetryMetadata;

    /// Start delivering points to `callback`
    ///
    /// The callback may be invoked from any thread. The returned function
    /// stops delivery.
    fn subscribe(&self, callback: DatumCallback) -> UnsubscribeFn;
}

/// An object whose telemetry is provided by other objects
#[async_trait]
pub trait DelegatingSource: Send + Sync {
    fn id(&self) -> &str;

    /// Telemetry the object produces itself, if any
    fn telemetry(&self) -> Option<Arc<dyn TelemetrySource>> {
        None
    }

    /// Look up the objects this one delegates to
    async fn delegates(&self) -> Result<Vec<DomainObject>, SubscriptionError>;
}

/// A domain object as seen by the subscription manager
#[derive(Clone)]
pub enum DomainObject {
    Direct(Arc<dyn TelemetrySource>),
    Delegating(Arc<dyn DelegatingSource>),
}

impl DomainObject {
    pub fn id(&self) -> &str {
        match self {
            DomainObject::Direct(source) => source.id(),
            DomainObject::Delegating(object) => object.id(),
        }
    }

    /// Flatten into the concrete telemetry sources behind this object
    ///
    /// Includes the object's own telemetry and that of its direct
    /// delegates, in order, without duplicates. A failed delegate lookup
    /// is logged and leaves only the sources found so far.
    pub async fn resolve(&self) -> Vec<Arc<dyn TelemetrySource>> {
        let mut resolved: Vec<Arc<dyn TelemetrySource>> = Vec::new();

        match self {
            DomainObject::Direct(source) => resolved.push(Arc::clone(source)),
            DomainObject::Delegating(object) => {
                if let Some(own) = object.telemetry() {
                    resolved.push(own);
                }

                match object.delegates().await {
                    Ok(delegates) => {
                        for delegate in delegates {
                            match delegate {
                                DomainObject::Direct(source) => resolved.push(source),
                                DomainObject::Delegating(inner) => match inner.telemetry() {
                                    Some(source) => resolved.push(source),
                                    None => tracing::debug!(
                                        object = %inner.id(),
                                        "Delegate has no telemetry of its own, skipped"
                                    ),
                                },
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            object = %object.id(),
                            error = %e,
                            "Failed to resolve delegates"
                        );
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        resolved.retain(|source| seen.insert(source.id().to_string()));
        resolved
    }
}

impl std::fmt::Debug for DomainObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainObject::Direct(source) => f.debug_tuple("Direct").field(&source.id()).finish(),
            DomainObject::Delegating(object) => {
                f.debug_tuple("Delegating").field(&object.id()).finish()
            }
        }
    }
}

/// In-process source that fans points out to its subscribers
///
/// Used for simulated telemetry and for wiring tests.
pub struct LocalSource {
    id: String,
    metadata: TelemetryMetadata,
    subscribers: Arc<Mutex<HashMap<u64, DatumCallback>>>,
    next_id: AtomicU64,
    total_subscribes: AtomicU64,
}

impl LocalSource {
    pub fn new(id: impl Into<String>, metadata: TelemetryMetadata) -> Self {
        Self {
            id: id.into(),
            metadata,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            total_subscribes: AtomicU64::new(0),
        }
    }

    /// Deliver a point to every current subscriber
    pub fn emit(&self, point: TelemetryPoint) {
        let callbacks: Vec<DatumCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(point.clone());
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of subscriptions ever opened
    pub fn total_subscribes(&self) -> u64 {
        self.total_subscribes.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for LocalSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> TelemetryMetadata {
        self.metadata.clone()
    }

    fn subscribe(&self, callback: DatumCallback) -> UnsubscribeFn {
        let key = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.total_subscribes.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, callback);

        let subscribers = Arc::clone(&self.subscribers);
        Box::new(move || {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        })
    }
}

/// Delegating object with a fixed list of delegates
pub struct StaticGroup {
    id: String,
    own: Option<Arc<dyn TelemetrySource>>,
    delegates: Vec<DomainObject>,
}

impl StaticGroup {
    pub fn new(id: impl Into<String>, delegates: Vec<DomainObject>) -> Self {
        Self {
            id: id.into(),
            own: None,
            delegates,
        }
    }

    /// Builder: give the group telemetry of its own
    pub fn with_telemetry(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.own = Some(source);
        self
    }
}

#[async_trait]
impl DelegatingSource for StaticGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn telemetry(&self) -> Option<Arc<dyn TelemetrySource>> {
        self.own.clone()
    }

    async fn delegates(&self) -> Result<Vec<DomainObject>, SubscriptionError> {
        Ok(self.delegates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingGroup {
        own: Arc<LocalSource>,
    }

    #[async_trait]
    impl DelegatingSource for FailingGroup {
        fn id(&self) -> &str {
            "broken"
        }

        fn telemetry(&self) -> Option<Arc<dyn TelemetrySource>> {
            Some(self.own.clone())
        }

        async fn delegates(&self) -> Result<Vec<DomainObject>, SubscriptionError> {
            Err(SubscriptionError::Resolution("composition unavailable".into()))
        }
    }

    fn local(id: &str) -> Arc<LocalSource> {
        Arc::new(LocalSource::new(id, TelemetryMetadata::default()))
    }

    fn ids(sources: &[Arc<dyn TelemetrySource>]) -> Vec<String> {
        sources.iter().map(|s| s.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolve_direct() {
        let object = DomainObject::Direct(local("sine"));
        assert_eq!(ids(&object.resolve().await), vec!["sine"]);
    }

    #[tokio::test]
    async fn test_resolve_delegates_dedupes() {
        let a = local("a");
        let group = StaticGroup::new(
            "panel",
            vec![
                DomainObject::Direct(a.clone()),
                DomainObject::Direct(local("b")),
                DomainObject::Direct(a),
                DomainObject::Delegating(Arc::new(StaticGroup::new("empty", vec![]))),
            ],
        )
        .with_telemetry(local("own"));

        let resolved = DomainObject::Delegating(Arc::new(group)).resolve().await;
        assert_eq!(ids(&resolved), vec!["own", "a", "b"]);
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_own_telemetry() {
        let object = DomainObject::Delegating(Arc::new(FailingGroup { own: local("own") }));
        assert_eq!(ids(&object.resolve().await), vec!["own"]);
    }

    #[test]
    fn test_local_source_subscribe_and_release() {
        let source = local("a");
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);

        let release = source.subscribe(Arc::new(move |point| r.lock().unwrap().push(point)));
        source.emit(TelemetryPoint::new().with("utc", 1));
        assert_eq!(source.subscriber_count(), 1);

        release();
        source.emit(TelemetryPoint::new().with("utc", 2));

        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(source.total_subscribes(), 1);
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
