//! Search Worker Message Types
//!
//! Messages exchanged between the coordinator and the background search
//! worker. Every message is plain JSON-serializable data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier correlating a search request with its response
pub type QueryId = u32;

/// Messages sent from the coordinator to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Add or replace an object model in the index
    Index {
        id: String,
        model: Value,
    },
    /// Run a query against the index
    #[serde(rename_all = "camelCase")]
    Search {
        input: String,
        max_results: usize,
        query_id: QueryId,
        /// Milliseconds since the Unix epoch when the query was posted
        timestamp: i64,
    },
}

/// Messages sent from the worker back to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum WorkerResponse {
    /// Acknowledges an `index` request
    Index { id: String },
    /// Results for a `search` request
    #[serde(rename_all = "camelCase")]
    Search {
        results: Vec<SearchHit>,
        total: usize,
        query_id: QueryId,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
    },
}

/// One matching object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub model: Value,
    pub score: u32,
}

/// Results delivered to a `query` caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Number of matches before truncation
    pub total: usize,
    /// The worker ran out of time and `hits` may be incomplete
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_request_wire_format() {
        let msg = WorkerRequest::Search {
            input: "temp".to_string(),
            max_results: 10,
            query_id: 7,
            timestamp: 1_699_000_000_000,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "request": "search",
                "input": "temp",
                "maxResults": 10,
                "queryId": 7,
                "timestamp": 1_699_000_000_000i64
            })
        );
    }

    #[test]
    fn test_index_request_wire_format() {
        let msg = WorkerRequest::Index {
            id: "mine:sensor".to_string(),
            model: json!({ "name": "Sensor" }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"request\":\"index\""));
        assert!(json.contains("\"id\":\"mine:sensor\""));
    }

    #[test]
    fn test_search_response_parses_without_timed_out() {
        let json = r#"{"request": "search", "results": [], "total": 0, "queryId": 3}"#;
        let msg: WorkerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            WorkerResponse::Search {
                results: vec![],
                total: 0,
                query_id: 3,
                timed_out: false,
            }
        );
    }

    #[test]
    fn test_timed_out_serialized_only_when_set() {
        let msg = WorkerResponse::Search {
            results: vec![],
            total: 0,
            query_id: 1,
            timed_out: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"timedOut\":true"));

        let msg = WorkerResponse::Search {
            results: vec![],
            total: 0,
            query_id: 1,
            timed_out: false,
        };
        assert!(!serde_json::to_string(&msg).unwrap().contains("timedOut"));
    }
}
