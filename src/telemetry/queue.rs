//! Telemetry pools - coalescing buffers between flush ticks
//!
//! - **TelemetryQueue** (lossless): a FIFO of frames. Each frame holds at
//!   most one point per source, so every point is delivered and each
//!   source's points stay in arrival order.
//! - **TelemetryTable** (lossy): a single frame where a newer point
//!   overwrites the older one from the same source.
//!
//! ```text
//! put(a,1) put(b,1) put(a,2) put(a,3)
//!
//! queue:  [{a:1, b:1}, {a:2}, {a:3}]   poll → {a:1, b:1}
//! table:  {a:3, b:1}                   poll → {a:3, b:1}
//! ```

use crate::telemetry::types::TelemetryPoint;
use std::collections::{HashMap, VecDeque};

/// Points polled together, keyed by source id
pub type TelemetryFrame = HashMap<String, TelemetryPoint>;

/// Lossless FIFO of frames
#[derive(Debug, Default)]
pub struct TelemetryQueue {
    frames: VecDeque<TelemetryFrame>,
    /// Number of queued frames holding each source. A source always
    /// occupies the first `counts[source]` frames.
    counts: HashMap<String, usize>,
}

impl TelemetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point to the first frame without an entry for `source`
    pub fn put(&mut self, source: &str, point: TelemetryPoint) {
        let count = self.counts.entry(source.to_string()).or_insert(0);
        let idx = *count;
        *count += 1;

        if idx == self.frames.len() {
            self.frames.push_back(TelemetryFrame::new());
        }
        self.frames[idx].insert(source.to_string(), point);
    }

    /// Remove and return the oldest frame
    pub fn poll(&mut self) -> Option<TelemetryFrame> {
        let frame = self.frames.pop_front()?;
        for source in frame.keys() {
            if let Some(count) = self.counts.get_mut(source) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(source);
                }
            }
        }
        Some(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Lossy latest-value table
#[derive(Debug, Default)]
pub struct TelemetryTable {
    latest: TelemetryFrame,
}

impl TelemetryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held point for `source`
    pub fn put(&mut self, source: &str, point: TelemetryPoint) {
        self.latest.insert(source.to_string(), point);
    }

    /// Take the whole table, leaving it empty
    pub fn poll(&mut self) -> Option<TelemetryFrame> {
        if self.latest.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.latest))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Either pool, selected by the subscriber's lossless flag
#[derive(Debug)]
pub enum TelemetryPool {
    Queue(TelemetryQueue),
    Table(TelemetryTable),
}

impl TelemetryPool {
    pub fn new(lossless: bool) -> Self {
        if lossless {
            TelemetryPool::Queue(TelemetryQueue::new())
        } else {
            TelemetryPool::Table(TelemetryTable::new())
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, TelemetryPool::Queue(_))
    }

    pub fn put(&mut self, source: &str, point: TelemetryPoint) {
        match self {
            TelemetryPool::Queue(queue) => queue.put(source, point),
            TelemetryPool::Table(table) => table.put(source, point),
        }
    }

    pub fn poll(&mut self) -> Option<TelemetryFrame> {
        match self {
            TelemetryPool::Queue(queue) => queue.poll(),
            TelemetryPool::Table(table) => table.poll(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TelemetryPool::Queue(queue) => queue.is_empty(),
            TelemetryPool::Table(table) => table.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: i64) -> TelemetryPoint {
        TelemetryPoint::new().with("value", v)
    }

    fn value_of(frame: &TelemetryFrame, source: &str) -> Option<i64> {
        frame
            .get(source)
            .and_then(|p| p.get_path("value"))
            .and_then(|v| v.as_i64())
    }

    #[test]
    fn test_queue_keeps_every_point_in_order() {
        let mut queue = TelemetryQueue::new();
        queue.put("a", value(1));
        queue.put("b", value(1));
        queue.put("a", value(2));
        queue.put("a", value(3));
        queue.put("b", value(2));

        assert_eq!(queue.len(), 3);

        let first = queue.poll().unwrap();
        assert_eq!(value_of(&first, "a"), Some(1));
        assert_eq!(value_of(&first, "b"), Some(1));

        let second = queue.poll().unwrap();
        assert_eq!(value_of(&second, "a"), Some(2));
        assert_eq!(value_of(&second, "b"), Some(2));

        let third = queue.poll().unwrap();
        assert_eq!(value_of(&third, "a"), Some(3));
        assert_eq!(third.len(), 1);

        assert!(queue.is_empty());
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_queue_put_after_partial_poll() {
        let mut queue = TelemetryQueue::new();
        queue.put("a", value(1));
        queue.put("a", value(2));
        queue.poll();

        queue.put("a", value(3));
        queue.put("b", value(1));

        let frame = queue.poll().unwrap();
        assert_eq!(value_of(&frame, "a"), Some(2));
        assert_eq!(value_of(&frame, "b"), Some(1));

        let frame = queue.poll().unwrap();
        assert_eq!(value_of(&frame, "a"), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_table_keeps_latest() {
        let mut table = TelemetryTable::new();
        for v in 0..100 {
            table.put("a", value(v));
        }
        table.put("b", value(7));

        let frame = table.poll().unwrap();
        assert_eq!(value_of(&frame, "a"), Some(99));
        assert_eq!(value_of(&frame, "b"), Some(7));
        assert!(table.is_empty());
        assert!(table.poll().is_none());
    }

    #[test]
    fn test_pool_selection() {
        assert!(TelemetryPool::new(true).is_lossless());
        assert!(!TelemetryPool::new(false).is_lossless());

        let mut pool = TelemetryPool::new(false);
        assert!(pool.is_empty());
        pool.put("a", value(1));
        pool.put("a", value(2));
        let frame = pool.poll().unwrap();
        assert_eq!(value_of(&frame, "a"), Some(2));
        assert!(pool.is_empty());
    }
}
