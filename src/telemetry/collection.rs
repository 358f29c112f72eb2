//! Telemetry Collection - Ordered, time-bounded telemetry for one source
//!
//! Holds the points currently visible for a single telemetry-producing
//! source, kept sorted by the active [`SortConfiguration`].
//!
//! # Buffering
//!
//! ```text
//!              start                      end
//!   discarded    |        telemetry        |    high_buffer
//!  <-------------|-------------------------|------------------->
//! ```
//!
//! - Points beyond `end` go to the high buffer and are promoted when the
//!   bounds advance past them.
//! - Points below a new `start` are removed and reported as discarded.
//!   Nothing is kept below the window.
//! - Shrinking `end` does not move anything back out of `telemetry` and
//!   does not recover previously discarded data. Callers issue a fresh
//!   historical request for that.

use crate::config::CollectionConfig;
use crate::telemetry::types::{SortConfiguration, SortOrder, TelemetryPoint, TimeBounds};
use std::cmp::Ordering;

/// Identifier returned when registering a listener
pub type ListenerId = u64;

/// Callback invoked with the points of an `added` or `discarded` event
pub type Listener = Box<dyn FnMut(&[TelemetryPoint]) + Send + Sync>;

/// Sorted, bounds-filtered view over a stream of telemetry points
pub struct TelemetryCollection {
    /// Visible points, sorted by `sort`
    telemetry: Vec<TelemetryPoint>,
    /// Points beyond the upper bound, sorted by domain value
    high_buffer: Vec<TelemetryPoint>,
    /// Active ordering
    sort: SortConfiguration,
    /// Active window (unset until the first `bounds` call)
    bounds: Option<TimeBounds>,
    /// Field holding the domain value of each point
    domain_key: String,
    added_listeners: Vec<(ListenerId, Listener)>,
    discarded_listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: ListenerId,
}

impl TelemetryCollection {
    /// Create a collection sorted ascending by its domain key
    pub fn new(domain_key: impl Into<String>) -> Self {
        let domain_key = domain_key.into();
        Self {
            telemetry: Vec::new(),
            high_buffer: Vec::new(),
            sort: SortConfiguration::ascending(domain_key.clone()),
            bounds: None,
            domain_key,
            added_listeners: Vec::new(),
            discarded_listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Create a collection from configuration
    pub fn with_config(config: &CollectionConfig) -> Self {
        let mut collection = Self::new(config.domain_key.clone());
        if let Some(field) = &config.sort_field {
            collection.sort = SortConfiguration::new(field.clone(), config.sort_order);
        } else {
            collection.sort.order = config.sort_order;
        }
        collection
    }

    // ==================== Observers ====================

    /// Register a listener for points entering `telemetry`
    pub fn on_added<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&[TelemetryPoint]) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.added_listeners.push((id, Box::new(listener)));
        id
    }

    /// Register a listener for points evicted by a bounds change
    pub fn on_discarded<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&[TelemetryPoint]) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.discarded_listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.added_listeners.len() + self.discarded_listeners.len();
        self.added_listeners.retain(|(lid, _)| *lid != id);
        self.discarded_listeners.retain(|(lid, _)| *lid != id);
        before != self.added_listeners.len() + self.discarded_listeners.len()
    }

    fn next_id(&mut self) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        id
    }

    fn emit(listeners: &mut [(ListenerId, Listener)], points: &[TelemetryPoint]) {
        if points.is_empty() {
            return;
        }
        for (_, listener) in listeners.iter_mut() {
            listener(points);
        }
    }

    // ==================== Operations ====================

    /// Change the ordering and re-sort everything currently held
    ///
    /// The sort is stable, so points with equal keys keep their relative
    /// order. Bounds and high buffer membership are unaffected.
    pub fn sort(&mut self, field: impl Into<String>, order: SortOrder) {
        self.sort = SortConfiguration::new(field, order);
        let sort = &self.sort;
        self.telemetry.sort_by(|a, b| sort.compare(a, b));

        tracing::debug!(
            field = %self.sort.field,
            order = %self.sort.order,
            points = self.telemetry.len(),
            "Collection re-sorted"
        );
    }

    /// Insert a batch of points
    ///
    /// Points whose domain value exceeds the current upper bound are held in
    /// the high buffer. Everything else is inserted in sort order after any
    /// points with an equal key. Exact duplicates are skipped. One `added`
    /// event carries the points accepted into `telemetry`.
    ///
    /// Returns the number of points added to `telemetry`.
    pub fn add<I>(&mut self, points: I) -> usize
    where
        I: IntoIterator<Item = TelemetryPoint>,
    {
        let mut added = Vec::new();
        let mut buffered = 0usize;
        let mut duplicates = 0usize;

        for point in points {
            if self.exceeds_upper_bound(&point) {
                self.buffer_high(point);
                buffered += 1;
                continue;
            }

            if self.insert_sorted(point.clone()) {
                added.push(point);
            } else {
                duplicates += 1;
            }
        }

        if buffered > 0 || duplicates > 0 {
            tracing::trace!(
                added = added.len(),
                buffered,
                duplicates,
                "Collection add"
            );
        }

        Self::emit(&mut self.added_listeners, &added);
        added.len()
    }

    /// Apply new time bounds
    ///
    /// A changed start evicts every visible point whose domain value is
    /// below it and reports them in one `discarded` event, in their
    /// original order. A changed end promotes high buffer points that now
    /// fit and reports them in one `added` event. `discarded` fires before
    /// `added`.
    pub fn bounds(&mut self, new_bounds: TimeBounds) {
        let previous = self.bounds.replace(new_bounds);
        let start_changed = previous.map_or(true, |b| b.start != new_bounds.start);
        let end_changed = previous.map_or(true, |b| b.end != new_bounds.end);

        let discarded = if start_changed {
            self.evict_below(new_bounds.start)
        } else {
            Vec::new()
        };

        let added = if end_changed {
            self.promote_through(new_bounds)
        } else {
            Vec::new()
        };

        tracing::debug!(
            start = new_bounds.start,
            end = new_bounds.end,
            discarded = discarded.len(),
            promoted = added.len(),
            buffered = self.high_buffer.len(),
            "Collection bounds changed"
        );

        Self::emit(&mut self.discarded_listeners, &discarded);
        Self::emit(&mut self.added_listeners, &added);
    }

    /// Drop all held points without emitting events
    pub fn clear(&mut self) {
        self.telemetry.clear();
        self.high_buffer.clear();
    }

    /// Release buffers and detach every listener
    pub fn destroy(&mut self) {
        self.clear();
        self.telemetry.shrink_to_fit();
        self.high_buffer.shrink_to_fit();
        self.added_listeners.clear();
        self.discarded_listeners.clear();
    }

    // ==================== Accessors ====================

    /// Visible points in sort order
    pub fn telemetry(&self) -> &[TelemetryPoint] {
        &self.telemetry
    }

    /// Points beyond the upper bound, ordered by domain value
    pub fn high_buffer(&self) -> &[TelemetryPoint] {
        &self.high_buffer
    }

    pub fn len(&self) -> usize {
        self.telemetry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.telemetry.is_empty()
    }

    pub fn current_bounds(&self) -> Option<TimeBounds> {
        self.bounds
    }

    pub fn sort_configuration(&self) -> &SortConfiguration {
        &self.sort
    }

    pub fn domain_key(&self) -> &str {
        &self.domain_key
    }

    // ==================== Internals ====================

    fn domain_of(&self, point: &TelemetryPoint) -> Option<f64> {
        point.number_at(&self.domain_key)
    }

    fn exceeds_upper_bound(&self, point: &TelemetryPoint) -> bool {
        match (self.bounds, self.domain_of(point)) {
            (Some(bounds), Some(value)) => value > bounds.end,
            _ => false,
        }
    }

    /// Insert after the last point with an equal key. Returns false for an
    /// exact duplicate.
    fn insert_sorted(&mut self, point: TelemetryPoint) -> bool {
        let sort = &self.sort;
        let upper = self
            .telemetry
            .partition_point(|p| sort.compare(p, &point) != Ordering::Greater);
        let lower = self.telemetry[..upper]
            .partition_point(|p| sort.compare(p, &point) == Ordering::Less);

        if self.telemetry[lower..upper].iter().any(|p| *p == point) {
            return false;
        }

        self.telemetry.insert(upper, point);
        true
    }

    fn buffer_high(&mut self, point: TelemetryPoint) {
        let value = self.domain_of(&point).unwrap_or(f64::INFINITY);
        let idx = self
            .high_buffer
            .partition_point(|p| self.domain_of(p).map_or(false, |v| v <= value));
        self.high_buffer.insert(idx, point);
    }

    fn evict_below(&mut self, start: f64) -> Vec<TelemetryPoint> {
        let is_below = |domain: Option<f64>| domain.map_or(false, |v| v < start);

        // Ascending by domain: the evicted points form a prefix.
        if self.sort.field == self.domain_key && self.sort.order == SortOrder::Ascending {
            let idx = self
                .telemetry
                .partition_point(|p| is_below(self.domain_of(p)));
            return self.telemetry.drain(..idx).collect();
        }

        let held = std::mem::take(&mut self.telemetry);
        let (discarded, kept): (Vec<_>, Vec<_>) = held
            .into_iter()
            .partition(|p| is_below(self.domain_of(p)));
        self.telemetry = kept;
        discarded
    }

    fn promote_through(&mut self, bounds: TimeBounds) -> Vec<TelemetryPoint> {
        let idx = self
            .high_buffer
            .partition_point(|p| self.domain_of(p).map_or(false, |v| v <= bounds.end));
        if idx == 0 {
            return Vec::new();
        }

        let ready: Vec<TelemetryPoint> = self.high_buffer.drain(..idx).collect();
        let mut promoted = Vec::with_capacity(ready.len());
        let mut skipped = 0usize;

        for point in ready {
            // Buffered points the window jumped over were never visible.
            if self.domain_of(&point).map_or(false, |v| v < bounds.start) {
                skipped += 1;
                continue;
            }
            if self.insert_sorted(point.clone()) {
                promoted.push(point);
            }
        }

        if skipped > 0 {
            tracing::trace!(skipped, "Dropped buffered points below new start");
        }

        promoted
    }
}

impl std::fmt::Debug for TelemetryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollection")
            .field("domain_key", &self.domain_key)
            .field("sort", &self.sort)
            .field("bounds", &self.bounds)
            .field("telemetry", &self.telemetry.len())
            .field("high_buffer", &self.high_buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn point(utc: i64) -> TelemetryPoint {
        TelemetryPoint::new().with("utc", utc).with("value", utc / 10)
    }

    fn domains(points: &[TelemetryPoint]) -> Vec<i64> {
        points
            .iter()
            .map(|p| p.get_path("utc").and_then(|v| v.as_i64()).unwrap())
            .collect()
    }

    type Events = Arc<Mutex<Vec<Vec<TelemetryPoint>>>>;

    fn record(collection: &mut TelemetryCollection) -> (Events, Events) {
        let added: Events = Arc::default();
        let discarded: Events = Arc::default();
        let a = Arc::clone(&added);
        let d = Arc::clone(&discarded);
        collection.on_added(move |points| a.lock().unwrap().push(points.to_vec()));
        collection.on_discarded(move |points| d.lock().unwrap().push(points.to_vec()));
        (added, discarded)
    }

    #[test]
    fn test_sorts_value_integer_ascending() {
        let mut collection = TelemetryCollection::new("utc");
        collection.sort("value.integer", SortOrder::Ascending);

        let values = [9, 2, 4, 7, 8, 5, 1, 3, 6, 0];
        collection.add(values.iter().map(|&v| {
            TelemetryPoint::new().with("value", json!({ "integer": v, "text": v.to_string() }))
        }));

        let sorted: Vec<i64> = collection
            .telemetry()
            .iter()
            .map(|p| p.get_path("value.integer").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_equal_keys_keep_arrival_order() {
        let mut collection = TelemetryCollection::new("utc");

        collection.add(vec![
            TelemetryPoint::new().with("utc", 5).with("seq", 0),
            TelemetryPoint::new().with("utc", 1).with("seq", 1),
            TelemetryPoint::new().with("utc", 5).with("seq", 2),
        ]);
        collection.add(vec![
            TelemetryPoint::new().with("utc", 5).with("seq", 3),
            TelemetryPoint::new().with("utc", 5).with("seq", 4),
        ]);

        let seqs: Vec<i64> = collection
            .telemetry()
            .iter()
            .map(|p| p.get_path("seq").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 0, 2, 3, 4]);
    }

    #[test]
    fn test_equal_keys_stable_when_descending() {
        let mut collection = TelemetryCollection::new("utc");
        collection.sort("utc", SortOrder::Descending);

        collection.add((0..4).map(|seq| TelemetryPoint::new().with("utc", 7).with("seq", seq)));
        collection.add(vec![TelemetryPoint::new().with("utc", 9).with("seq", 99)]);

        let seqs: Vec<i64> = collection
            .telemetry()
            .iter()
            .map(|p| p.get_path("seq").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(seqs, vec![99, 0, 1, 2, 3]);
    }

    #[test]
    fn test_resort_is_stable_and_complete() {
        let mut collection = TelemetryCollection::new("utc");
        collection.add(vec![
            TelemetryPoint::new().with("utc", 1).with("group", "b"),
            TelemetryPoint::new().with("utc", 2).with("group", "a"),
            TelemetryPoint::new().with("utc", 3).with("group", "b"),
            TelemetryPoint::new().with("utc", 4).with("group", "a"),
        ]);

        collection.sort("group", SortOrder::Ascending);
        assert_eq!(domains(collection.telemetry()), vec![2, 4, 1, 3]);

        collection.sort("utc", SortOrder::Descending);
        assert_eq!(domains(collection.telemetry()), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_missing_sort_field_sorts_last() {
        let mut collection = TelemetryCollection::new("utc");
        collection.sort("value.integer", SortOrder::Descending);

        collection.add(vec![
            TelemetryPoint::new().with("utc", 1),
            TelemetryPoint::new().with("utc", 2).with("value", json!({ "integer": 1 })),
            TelemetryPoint::new().with("utc", 3).with("value", json!({ "integer": 5 })),
        ]);

        assert_eq!(domains(collection.telemetry()), vec![3, 2, 1]);
    }

    #[test]
    fn test_duplicates_are_skipped() {
        let mut collection = TelemetryCollection::new("utc");
        let (added, _) = record(&mut collection);

        assert_eq!(collection.add(vec![point(1000), point(2000)]), 2);
        assert_eq!(collection.add(vec![point(2000), point(3000)]), 1);

        assert_eq!(domains(collection.telemetry()), vec![1000, 2000, 3000]);
        let events = added.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(domains(&events[1]), vec![3000]);
    }

    #[test]
    fn test_one_added_event_per_batch() {
        let mut collection = TelemetryCollection::new("utc");
        let (added, _) = record(&mut collection);

        collection.add((0..5).map(|i| point(i * 1000)));
        collection.add(Vec::new());

        let events = added.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].len(), 5);
    }

    #[test]
    fn test_bounds_evicts_and_buffers() {
        let mut collection = TelemetryCollection::new("utc");
        collection.bounds(TimeBounds::new(0.0, 8000.0).unwrap());
        let (added, discarded) = record(&mut collection);

        collection.add((0..10).map(|i| point(i * 1000)));
        assert_eq!(domains(collection.telemetry()), (0..=8).map(|i| i * 1000).collect::<Vec<_>>());
        assert_eq!(domains(collection.high_buffer()), vec![9000]);
        assert_eq!(domains(&added.lock().unwrap()[0]).last(), Some(&8000));

        collection.bounds(TimeBounds::new(5000.0, 8000.0).unwrap());

        let discarded = discarded.lock().unwrap();
        assert_eq!(discarded.len(), 1);
        assert_eq!(domains(&discarded[0]), vec![0, 1000, 2000, 3000, 4000]);
        assert_eq!(domains(collection.telemetry()), vec![5000, 6000, 7000, 8000]);
        assert_eq!(domains(collection.high_buffer()), vec![9000]);

        // End did not change, so nothing was promoted.
        assert_eq!(added.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_high_buffer_promotion() {
        let mut collection = TelemetryCollection::new("utc");
        collection.bounds(TimeBounds::new(0.0, 10000.0).unwrap());
        collection.add((0..5).map(|i| point(i * 1000)));
        let (added, discarded) = record(&mut collection);

        collection.add(vec![point(11000)]);
        assert_eq!(collection.high_buffer().len(), 1);
        assert_eq!(collection.len(), 5);
        assert!(added.lock().unwrap().is_empty());

        collection.bounds(TimeBounds::new(0.0, 11000.0).unwrap());
        assert_eq!(collection.len(), 6);
        assert!(collection.high_buffer().is_empty());
        assert!(discarded.lock().unwrap().is_empty());

        let events = added.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(domains(&events[0]), vec![11000]);
    }

    #[test]
    fn test_promotion_respects_sort_order() {
        let mut collection = TelemetryCollection::new("utc");
        collection.sort("utc", SortOrder::Descending);
        collection.bounds(TimeBounds::new(0.0, 100.0).unwrap());

        collection.add(vec![point(50), point(150), point(120), point(90)]);
        assert_eq!(domains(collection.high_buffer()), vec![120, 150]);

        collection.bounds(TimeBounds::new(0.0, 130.0).unwrap());
        assert_eq!(domains(collection.telemetry()), vec![120, 90, 50]);
        assert_eq!(domains(collection.high_buffer()), vec![150]);
    }

    #[test]
    fn test_window_jump_skips_stale_buffered_points() {
        let mut collection = TelemetryCollection::new("utc");
        collection.bounds(TimeBounds::new(0.0, 100.0).unwrap());
        collection.add(vec![point(50), point(150), point(250)]);
        let (added, discarded) = record(&mut collection);

        collection.bounds(TimeBounds::new(200.0, 300.0).unwrap());

        assert_eq!(domains(collection.telemetry()), vec![250]);
        assert!(collection.high_buffer().is_empty());
        assert_eq!(domains(&discarded.lock().unwrap()[0]), vec![50]);
        assert_eq!(domains(&added.lock().unwrap()[0]), vec![250]);
    }

    #[test]
    fn test_end_decrease_recovers_nothing() {
        let mut collection = TelemetryCollection::new("utc");
        collection.bounds(TimeBounds::new(0.0, 10000.0).unwrap());
        collection.add((0..=10).map(|i| point(i * 1000)));
        let (added, discarded) = record(&mut collection);

        collection.bounds(TimeBounds::new(0.0, 5000.0).unwrap());

        assert_eq!(collection.len(), 11);
        assert!(collection.high_buffer().is_empty());
        assert!(added.lock().unwrap().is_empty());
        assert!(discarded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_eviction_with_non_domain_sort() {
        let mut collection = TelemetryCollection::new("utc");
        collection.sort("value", SortOrder::Descending);
        collection.add(vec![
            TelemetryPoint::new().with("utc", 10).with("value", 1),
            TelemetryPoint::new().with("utc", 20).with("value", 3),
            TelemetryPoint::new().with("utc", 30).with("value", 2),
            TelemetryPoint::new().with("value", 0),
        ]);
        let (_, discarded) = record(&mut collection);

        collection.bounds(TimeBounds::new(25.0, 100.0).unwrap());

        let values: Vec<i64> = collection
            .telemetry()
            .iter()
            .map(|p| p.get_path("value").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(values, vec![2, 0]);
        assert_eq!(domains(&discarded.lock().unwrap()[0]), vec![20, 10]);
    }

    #[test]
    fn test_clear_emits_nothing() {
        let mut collection = TelemetryCollection::new("utc");
        collection.bounds(TimeBounds::new(0.0, 10.0).unwrap());
        collection.add(vec![point(5), point(50)]);
        let (added, discarded) = record(&mut collection);

        collection.clear();
        collection.clear();

        assert!(collection.is_empty());
        assert!(collection.high_buffer().is_empty());
        assert!(added.lock().unwrap().is_empty());
        assert!(discarded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_detaches_listeners() {
        let mut collection = TelemetryCollection::new("utc");
        let (added, _) = record(&mut collection);

        collection.destroy();
        collection.destroy();
        collection.add(vec![point(1)]);

        assert!(added.lock().unwrap().is_empty());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_off_removes_listener() {
        let mut collection = TelemetryCollection::new("utc");
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let id = collection.on_added(move |_| *c.lock().unwrap() += 1);

        collection.add(vec![point(1)]);
        assert!(collection.off(id));
        assert!(!collection.off(id));
        collection.add(vec![point(2)]);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_with_config() {
        let config = CollectionConfig {
            domain_key: "scet".to_string(),
            sort_field: Some("value".to_string()),
            sort_order: SortOrder::Descending,
        };
        let collection = TelemetryCollection::with_config(&config);
        assert_eq!(collection.domain_key(), "scet");
        assert_eq!(
            collection.sort_configuration(),
            &SortConfiguration::new("value", SortOrder::Descending)
        );
    }

    #[test]
    fn test_collection_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TelemetryCollection>();
        assert_send_sync::<tokio::sync::RwLock<TelemetryCollection>>();
    }
}
