//! Search error types

use crate::search::messages::QueryId;
use thiserror::Error;

/// Errors raised by the search index and its coordinator
#[derive(Error, Debug)]
pub enum SearchError {
    /// The object provider has no object with this id
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The worker is gone or refusing requests
    #[error("Search worker unavailable")]
    WorkerUnavailable,

    /// No response arrived within the query timeout
    #[error("Query {query_id} timed out after {timeout_ms}ms")]
    Timeout { query_id: QueryId, timeout_ms: u64 },

    /// The coordinator was reset or shut down while the query was pending
    #[error("Search coordinator shut down")]
    Shutdown,
}

pub type SearchResult<T> = Result<T, SearchError>;
