//! Telemetry layer error types

use thiserror::Error;

/// Errors that can occur in the telemetry layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// Bounds with start after end (or NaN)
    #[error("Invalid time bounds: start {start} is after end {end}")]
    InvalidBounds { start: f64, end: f64 },
}

/// Result type alias for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::InvalidBounds {
            start: 10.0,
            end: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid time bounds: start 10 is after end 5"
        );
    }
}
