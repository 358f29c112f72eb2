//! Search Index Coordinator
//!
//! Walks the object graph, feeds object models to the search worker and
//! correlates query responses with their callers.
//!
//! Indexing is throttled: at most `max_concurrent_requests` objects are
//! being fetched or awaiting a worker ack at any moment. Each id is indexed
//! once, so cyclic compositions terminate.

use crate::config::SearchConfig;
use crate::search::error::{SearchError, SearchResult};
use crate::search::messages::{QueryId, SearchResults, WorkerRequest, WorkerResponse};
use crate::search::worker::SearchWorker;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// An object as returned by an [`ObjectProvider`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexableObject {
    pub id: String,
    pub model: Value,
    /// Ids of child objects
    #[serde(default)]
    pub composition: Vec<String>,
}

impl IndexableObject {
    pub fn new(id: impl Into<String>, model: Value) -> Self {
        Self {
            id: id.into(),
            model,
            composition: Vec::new(),
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.composition = children.into_iter().map(Into::into).collect();
        self
    }
}

/// A change to an object's model
#[derive(Debug, Clone)]
pub struct ObjectMutation {
    pub object: IndexableObject,
    /// Mutations made inside an edit session are not indexed until saved
    pub in_edit_context: bool,
}

/// Source of objects to index
#[async_trait]
pub trait ObjectProvider: Send + Sync {
    async fn get(&self, id: &str) -> SearchResult<IndexableObject>;
}

/// Object provider backed by a map
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    objects: RwLock<HashMap<String, IndexableObject>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, object: IndexableObject) {
        self.objects.write().await.insert(object.id.clone(), object);
    }
}

#[async_trait]
impl ObjectProvider for InMemoryProvider {
    async fn get(&self, id: &str) -> SearchResult<IndexableObject> {
        self.objects
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SearchError::NotFound(id.to_string()))
    }
}

/// Where an id stands in the indexing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Unindexed,
    /// Queued, being fetched, or awaiting the worker's ack
    Pending,
    Indexed,
}

#[derive(Default)]
struct CoordinatorState {
    pending: HashSet<String>,
    indexed: HashSet<String>,
    queue: VecDeque<String>,
    /// Requests holding a concurrency slot
    in_flight: usize,
    /// Posted ids and the children to schedule once acknowledged
    awaiting_ack: HashMap<String, Vec<String>>,
    pending_queries: HashMap<QueryId, oneshot::Sender<SearchResults>>,
    next_query_id: QueryId,
    /// Bumped on reset so that fetches started earlier are discarded
    generation: u64,
}

impl CoordinatorState {
    /// Queue an id unless it is already pending or indexed
    fn enqueue(&mut self, id: String) -> bool {
        if self.indexed.contains(&id) || self.pending.contains(&id) {
            return false;
        }
        self.pending.insert(id.clone());
        self.queue.push_back(id);
        true
    }

    fn allocate_query_id(&mut self) -> QueryId {
        loop {
            let id = self.next_query_id;
            self.next_query_id = self.next_query_id.wrapping_add(1);
            if !self.pending_queries.contains_key(&id) {
                return id;
            }
        }
    }

    fn release_slot(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

struct CoordinatorInner {
    worker: SearchWorker,
    provider: Arc<dyn ObjectProvider>,
    config: SearchConfig,
    state: Mutex<CoordinatorState>,
}

impl CoordinatorInner {
    /// Start fetches until the concurrency limit is reached
    fn keep_indexing(self: &Arc<Self>, state: &mut CoordinatorState) {
        let limit = self.config.max_concurrent_requests.max(1);

        while state.in_flight < limit {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            state.in_flight += 1;

            let inner = Arc::clone(self);
            let generation = state.generation;
            tokio::spawn(async move {
                inner.begin_index_request(id, generation).await;
            });
        }
    }

    async fn begin_index_request(self: Arc<Self>, id: String, generation: u64) {
        let fetched = self.provider.get(&id).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            trace!(object_id = %id, "Discarding fetch from before reset");
            return;
        }

        match fetched {
            Ok(object) => {
                let request = WorkerRequest::Index {
                    id: id.clone(),
                    model: object.model,
                };
                match self.worker.post(request) {
                    Ok(()) => {
                        state.awaiting_ack.insert(id, object.composition);
                    }
                    Err(e) => {
                        warn!(object_id = %id, error = %e, "Failed to post object to search worker");
                        state.pending.remove(&id);
                        state.release_slot();
                        self.keep_indexing(&mut state);
                    }
                }
            }
            Err(e) => {
                warn!(object_id = %id, error = %e, "Failed to fetch object for indexing");
                state.pending.remove(&id);
                state.release_slot();
                self.keep_indexing(&mut state);
            }
        }
    }

    async fn handle_response(self: &Arc<Self>, response: WorkerResponse) {
        match response {
            WorkerResponse::Index { id } => {
                let mut state = self.state.lock().await;
                let Some(children) = state.awaiting_ack.remove(&id) else {
                    trace!(object_id = %id, "Ack for untracked object");
                    return;
                };

                state.pending.remove(&id);
                state.indexed.insert(id);
                state.release_slot();

                for child in children {
                    state.enqueue(child);
                }
                self.keep_indexing(&mut state);
            }
            WorkerResponse::Search {
                results,
                total,
                query_id,
                timed_out,
            } => {
                let waiter = self.state.lock().await.pending_queries.remove(&query_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(SearchResults {
                            hits: results,
                            total,
                            timed_out,
                        });
                    }
                    None => trace!(query_id, "Dropping results for unknown query"),
                }
            }
        }
    }

    /// Release every credit and waiter once the worker stops responding
    ///
    /// The worker handle is closed, so fetches still running fail to post
    /// and clean up after themselves.
    async fn abandon_outstanding(&self) {
        self.worker.close();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let abandoned: Vec<String> = state
            .awaiting_ack
            .drain()
            .map(|(id, _)| id)
            .chain(state.queue.drain(..))
            .collect();
        for id in &abandoned {
            state.pending.remove(id);
        }
        state.in_flight = 0;
        let failed_queries = state.pending_queries.len();
        state.pending_queries.clear();

        if abandoned.is_empty() && failed_queries == 0 {
            debug!("Search worker response stream closed");
        } else {
            warn!(
                abandoned = abandoned.len(),
                failed_queries,
                "Search worker stopped responding; outstanding work released"
            );
        }
    }
}

/// Drives indexing and querying against a [`SearchWorker`]
pub struct SearchIndexCoordinator {
    inner: Arc<CoordinatorInner>,
    pump: JoinHandle<()>,
    listeners: StdMutex<Vec<JoinHandle<()>>>,
}

impl SearchIndexCoordinator {
    /// Create a coordinator around an existing worker
    ///
    /// `responses` must be the response stream of that worker. Must be
    /// called from within a tokio runtime.
    pub fn new(
        worker: SearchWorker,
        mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
        provider: Arc<dyn ObjectProvider>,
        config: &SearchConfig,
    ) -> Self {
        let inner = Arc::new(CoordinatorInner {
            worker,
            provider,
            config: config.clone(),
            state: Mutex::new(CoordinatorState::default()),
        });

        let pump_inner = Arc::clone(&inner);
        let pump = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                pump_inner.handle_response(response).await;
            }
            pump_inner.abandon_outstanding().await;
        });

        Self {
            inner,
            pump,
            listeners: StdMutex::new(Vec::new()),
        }
    }

    /// Start a worker thread and a coordinator for it
    pub fn spawn(provider: Arc<dyn ObjectProvider>, config: &SearchConfig) -> SearchResult<Self> {
        let (worker, responses) = SearchWorker::spawn(config)?;
        Ok(Self::new(worker, responses, provider, config))
    }

    /// Queue an object and, transitively, its composition for indexing
    ///
    /// Returns false if the id is already pending or indexed.
    pub async fn schedule_for_indexing(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let scheduled = state.enqueue(id.to_string());
        if scheduled {
            debug!(object_id = %id, "Scheduled for indexing");
            self.inner.keep_indexing(&mut state);
        }
        scheduled
    }

    /// Search the index
    ///
    /// Resolves with the worker's results, or fails with
    /// [`SearchError::Timeout`] if no response arrives in time.
    pub async fn query(&self, input: &str, max_results: usize) -> SearchResult<SearchResults> {
        let (tx, rx) = oneshot::channel();

        let query_id = {
            let mut state = self.inner.state.lock().await;
            let query_id = state.allocate_query_id();
            state.pending_queries.insert(query_id, tx);

            let request = WorkerRequest::Search {
                input: input.to_string(),
                max_results,
                query_id,
                timestamp: Utc::now().timestamp_millis(),
            };
            if let Err(e) = self.inner.worker.post(request) {
                state.pending_queries.remove(&query_id);
                return Err(e);
            }
            query_id
        };

        let timeout_ms = self.inner.config.query_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(_)) => Err(SearchError::Shutdown),
            Err(_) => {
                self.inner.state.lock().await.pending_queries.remove(&query_id);
                warn!(query_id, timeout_ms, "Search query timed out");
                Err(SearchError::Timeout {
                    query_id,
                    timeout_ms,
                })
            }
        }
    }

    /// Re-index a mutated object
    ///
    /// Returns false if the mutation was skipped because it happened in an
    /// edit context.
    pub async fn on_mutation(&self, mutation: ObjectMutation) -> SearchResult<bool> {
        let ObjectMutation {
            object,
            in_edit_context,
        } = mutation;

        if in_edit_context {
            trace!(object_id = %object.id, "Skipping mutation in edit context");
            return Ok(false);
        }

        let mut state = self.inner.state.lock().await;
        self.inner.worker.post(WorkerRequest::Index {
            id: object.id.clone(),
            model: object.model,
        })?;

        if !state.pending.contains(&object.id) {
            state.indexed.insert(object.id.clone());
        }
        for child in object.composition {
            state.enqueue(child);
        }
        self.inner.keep_indexing(&mut state);

        debug!(object_id = %object.id, "Re-indexed mutated object");
        Ok(true)
    }

    /// Apply every mutation published on `mutations` until it closes
    pub fn listen_for_mutations(
        self: &Arc<Self>,
        mut mutations: broadcast::Receiver<ObjectMutation>,
    ) {
        let coordinator = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match mutations.recv().await {
                    Ok(mutation) => {
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        if let Err(e) = coordinator.on_mutation(mutation).await {
                            warn!(error = %e, "Failed to re-index mutated object");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Mutation listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub async fn index_state(&self, id: &str) -> IndexState {
        let state = self.inner.state.lock().await;
        if state.pending.contains(id) {
            IndexState::Pending
        } else if state.indexed.contains(id) {
            IndexState::Indexed
        } else {
            IndexState::Unindexed
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn indexed_count(&self) -> usize {
        self.inner.state.lock().await.indexed.len()
    }

    /// Number of queries awaiting a response
    pub async fn pending_queries(&self) -> usize {
        self.inner.state.lock().await.pending_queries.len()
    }

    /// Forget all indexing state and fail outstanding queries
    ///
    /// The worker keeps its index; acks and results that arrive for work
    /// started before the reset are ignored.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        let generation = state.generation.wrapping_add(1);
        let next_query_id = state.next_query_id;
        let failed = state.pending_queries.len();
        *state = CoordinatorState {
            generation,
            next_query_id,
            ..CoordinatorState::default()
        };
        info!(failed_queries = failed, "Search coordinator reset");
    }

    /// Reset, stop the worker and stop listening for mutations
    pub async fn shutdown(&self) {
        self.reset().await;
        self.inner.worker.close();
        self.pump.abort();
        for handle in self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        info!("Search coordinator shut down");
    }
}

impl Drop for SearchIndexCoordinator {
    fn drop(&mut self) {
        self.pump.abort();
        for handle in self
            .listeners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}
