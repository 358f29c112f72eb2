//! Core data types for the telemetry layer
//!
//! This module defines the value types shared by collections, queues and
//! the subscription manager:
//! - `TelemetryPoint`: One opaque telemetry datum (field name → value)
//! - `TimeBounds`: The active time window
//! - `SortConfiguration` and `SortOrder`: Ordering of a collection

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::{TelemetryError, TelemetryResult};

/// A single telemetry datum
///
/// Points carry no fixed schema. Typically a point holds a domain field
/// (a timestamp such as `utc`) and one or more range fields. Nested fields
/// are addressed with dotted paths, e.g. `value.integer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryPoint(Map<String, Value>);

impl TelemetryPoint {
    /// Create an empty point
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder method: set a top-level field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a top-level field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a field by dotted path
    ///
    /// Returns `None` when any segment along the path is missing or is not
    /// an object. A literal top-level key containing dots wins over a
    /// nested lookup.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Numeric value at a path, if present and numeric
    pub fn number_at(&self, path: &str) -> Option<f64> {
        self.get_path(path).and_then(Value::as_f64)
    }
}

impl From<Map<String, Value>> for TelemetryPoint {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Time window (closed interval: [start, end])
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBounds {
    /// Lower bound of the window (inclusive)
    pub start: f64,
    /// Upper bound of the window (inclusive)
    pub end: f64,
}

impl TimeBounds {
    /// Create bounds, failing if `start > end`
    pub fn new(start: f64, end: f64) -> TelemetryResult<Self> {
        Self::try_new(start, end).ok_or(TelemetryError::InvalidBounds { start, end })
    }

    /// Create bounds, returning None if inverted or NaN
    pub fn try_new(start: f64, end: f64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Width of the window
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Shift the window forward by `delta`, keeping its width
    pub fn advance(&self, delta: f64) -> Self {
        Self {
            start: self.start + delta,
            end: self.end + delta,
        }
    }
}

/// Direction of a collection's ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "asc"),
            SortOrder::Descending => write!(f, "desc"),
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Field and direction a collection is ordered by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfiguration {
    /// Dotted path of the sort field
    pub field: String,
    /// Sort direction
    #[serde(default)]
    pub order: SortOrder,
}

impl SortConfiguration {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Ascending)
    }

    /// Compare two points under this configuration
    ///
    /// Missing values sort last regardless of direction.
    pub fn compare(&self, a: &TelemetryPoint, b: &TelemetryPoint) -> Ordering {
        compare_keys(a.get_path(&self.field), b.get_path(&self.field), self.order)
    }
}

/// Compare two optional sort keys
///
/// Present values compare by [`compare_values`] and are flipped for
/// descending order; a missing value is always greater than a present one.
pub fn compare_keys(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        }
    }
}

/// Total order over JSON values: numbers < strings < booleans < other
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            _ => 3,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
