//! Subscription error types

use thiserror::Error;

/// Errors that can occur while resolving or running subscriptions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Delegate lookup failed
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// The subscription has already been released
    #[error("Subscription closed")]
    Closed,
}
