//! Search Index Worker
//!
//! Holds the in-memory index of object models on a dedicated OS thread and
//! answers substring queries against it. The worker shares no memory with
//! the rest of the process: requests and responses travel over channels.
//!
//! # Matching
//!
//! The query is trimmed, lowercased and split on whitespace. An object
//! matches when every term occurs in its lowercased name.
//!
//! | Condition                          | Score |
//! |------------------------------------|-------|
//! | term found at the start of a word  | +2    |
//! | term found elsewhere               | +1    |
//! | whole query equals the name        | +10   |
//!
//! Hits are ordered by score (highest first), then by id.

use crate::config::SearchConfig;
use crate::search::error::SearchError;
use crate::search::messages::{SearchHit, WorkerRequest, WorkerResponse};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// How many entries are scanned between deadline checks
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// One indexed object
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub model: Value,
    /// Lowercased display name used for matching
    name: String,
}

impl IndexEntry {
    fn new(id: String, model: Value) -> Self {
        let name = model
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(id.as_str())
            .to_lowercase();

        Self {
            id,
            model,
            name,
        }
    }
}

/// Outcome of a search over the index
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub timed_out: bool,
}

/// In-memory index of object models
#[derive(Debug, Default)]
pub struct SearchIndex {
    entries: HashMap<String, IndexEntry>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an object
    pub fn index(&mut self, id: String, model: Value) {
        self.entries.insert(id.clone(), IndexEntry::new(id, model));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match `input` against every entry
    ///
    /// `deadline_ms` is an absolute Unix time in milliseconds. Once it
    /// passes, scanning stops and the outcome is flagged as timed out.
    pub fn search(&self, input: &str, max_results: usize, deadline_ms: Option<i64>) -> SearchOutcome {
        let query = input.trim().to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return SearchOutcome::default();
        }

        let mut matches: Vec<(u32, &IndexEntry)> = Vec::new();
        let mut timed_out = false;

        for (scanned, entry) in self.entries.values().enumerate() {
            if scanned % DEADLINE_CHECK_INTERVAL == DEADLINE_CHECK_INTERVAL - 1 {
                if let Some(deadline) = deadline_ms {
                    if Utc::now().timestamp_millis() > deadline {
                        timed_out = true;
                        break;
                    }
                }
            }

            if let Some(score) = score_name(&entry.name, &terms, &query) {
                matches.push((score, entry));
            }
        }

        matches.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len();
        let hits = matches
            .into_iter()
            .take(max_results)
            .map(|(score, entry)| SearchHit {
                id: entry.id.clone(),
                model: entry.model.clone(),
                score,
            })
            .collect();

        SearchOutcome {
            hits,
            total,
            timed_out,
        }
    }
}

/// Score a lowercased name, or None if some term is missing
fn score_name(name: &str, terms: &[&str], query: &str) -> Option<u32> {
    let mut score = 0;

    for term in terms {
        let mut found = false;
        let mut at_word_start = false;

        for (idx, _) in name.match_indices(term) {
            found = true;
            let preceded_by_word_char = name[..idx]
                .chars()
                .next_back()
                .map_or(false, char::is_alphanumeric);
            if !preceded_by_word_char {
                at_word_start = true;
                break;
            }
        }

        if !found {
            return None;
        }
        score += if at_word_start { 2 } else { 1 };
    }

    if name == query {
        score += 10;
    }

    Some(score)
}

/// Handle used to post requests to a search worker
///
/// The worker thread exits once the handle is closed or dropped.
pub struct SearchWorker {
    tx: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SearchWorker {
    /// Start a worker thread
    ///
    /// Returns the handle and the stream of worker responses.
    pub fn spawn(
        config: &SearchConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerResponse>), SearchError> {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let budget_ms = config.search_timeout_ms as i64;

        let thread = std::thread::Builder::new()
            .name("search-worker".to_string())
            .spawn(move || run_worker(req_rx, resp_tx, budget_ms))
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to start search worker");
                SearchError::WorkerUnavailable
            })?;

        tracing::info!("Search worker started");

        Ok((
            Self {
                tx: Mutex::new(Some(req_tx)),
                thread: Mutex::new(Some(thread)),
            },
            resp_rx,
        ))
    }

    /// Wrap a request channel served by some other worker loop
    pub fn from_sender(tx: mpsc::UnboundedSender<WorkerRequest>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(None),
        }
    }

    /// Post a request to the worker
    pub fn post(&self, request: WorkerRequest) -> Result<(), SearchError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(SearchError::WorkerUnavailable)?;
        tx.send(request).map_err(|_| SearchError::WorkerUnavailable)
    }

    pub fn is_open(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |tx| !tx.is_closed())
    }

    /// Stop accepting requests; the thread exits after its current message
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Close and wait for the worker thread to exit
    ///
    /// Blocks the calling thread; do not call from inside an async task.
    pub fn shutdown(&self) {
        self.close();
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Search worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for SearchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchWorker")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Worker thread body
fn run_worker(
    mut rx: mpsc::UnboundedReceiver<WorkerRequest>,
    tx: mpsc::UnboundedSender<WorkerResponse>,
    budget_ms: i64,
) {
    let mut index = SearchIndex::new();

    while let Some(request) = rx.blocking_recv() {
        let response = match request {
            WorkerRequest::Index { id, model } => {
                index.index(id.clone(), model);
                WorkerResponse::Index { id }
            }
            WorkerRequest::Search {
                input,
                max_results,
                query_id,
                timestamp,
            } => {
                let deadline = timestamp.saturating_add(budget_ms);
                let outcome = index.search(&input, max_results, Some(deadline));
                if outcome.timed_out {
                    tracing::warn!(query_id, total = outcome.total, "Search timed out");
                }
                WorkerResponse::Search {
                    results: outcome.hits,
                    total: outcome.total,
                    query_id,
                    timed_out: outcome.timed_out,
                }
            }
        };

        if tx.send(response).is_err() {
            break;
        }
    }

    tracing::info!(entries = index.len(), "Search worker stopped");
}
