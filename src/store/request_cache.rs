use crate::error::HierarchyError;
use crate::model::ProcessedNode;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Output of one hierarchy request execution
pub type LevelResult = Result<Arc<Vec<ProcessedNode>>, HierarchyError>;

/// Execution shared by every caller of the same request
pub type SharedLevel = Shared<BoxFuture<'static, LevelResult>>;

/// Observable state of a request. Failed and canceled executions are removed
/// from the cache, so they read back as `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Running,
    Completed,
}

struct CacheEntry {
    /// Distinguishes an entry from a later one stored under the same key
    generation: u64,
    execution: SharedLevel,
    /// Live `CachedRequest`s for this entry
    waiters: Arc<AtomicUsize>,
}

/// Handle returned to a caller of the cache. Counts as a waiter on the execution
/// until dropped.
pub struct CachedRequest {
    pub key: String,
    pub generation: u64,
    pub execution: SharedLevel,
    /// Whether this caller started the execution
    pub started: bool,
    waiters: Arc<AtomicUsize>,
}

impl CachedRequest {
    fn new(key: &str, generation: u64, execution: SharedLevel, started: bool, waiters: Arc<AtomicUsize>) -> Self {
        waiters.fetch_add(1, Ordering::SeqCst);
        Self {
            key: key.to_string(),
            generation,
            execution,
            started,
            waiters,
        }
    }

    /// Whether another handle to the same execution is alive
    pub fn is_shared(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) > 1
    }

    pub fn is_finished(&self) -> bool {
        self.execution.peek().is_some()
    }
}

impl Clone for CachedRequest {
    fn clone(&self) -> Self {
        Self::new(&self.key, self.generation, self.execution.clone(), self.started, self.waiters.clone())
    }
}

impl Drop for CachedRequest {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Coalesces identical hierarchy requests, in flight or completed, by their
/// canonical key. Invalidation is all-or-nothing.
#[derive(Default)]
pub struct RequestCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    next_generation: AtomicU64,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the execution stored under `key`, or store and return the one made by `start`.
    /// `start` only builds the future; nothing runs until a caller polls it.
    pub fn get_or_start<F>(&self, key: &str, start: F) -> CachedRequest
    where
        F: FnOnce() -> BoxFuture<'static, LevelResult>,
    {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            debug!("Request cache hit for {}", key);
            return CachedRequest::new(
                key,
                entry.generation,
                entry.execution.clone(),
                false,
                entry.waiters.clone(),
            );
        }

        debug!("Request cache miss for {}", key);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let execution = start().shared();
        let waiters = Arc::new(AtomicUsize::new(0));
        entries.insert(
            key.to_string(),
            CacheEntry {
                generation,
                execution: execution.clone(),
                waiters: waiters.clone(),
            },
        );

        CachedRequest::new(key, generation, execution, true, waiters)
    }

    /// Remove the entry unless it was replaced by a newer one in the meantime
    pub fn remove(&self, request: &CachedRequest) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&request.key) {
            Some(entry) if entry.generation == request.generation => {
                entries.remove(&request.key);
                true
            }
            _ => false,
        }
    }

    /// Remove an unfinished entry that only `request` is waiting on. Other waiters
    /// keep the execution and its result stays cached.
    pub fn abandon(&self, request: &CachedRequest) -> bool {
        if request.is_finished() || request.is_shared() {
            return false;
        }
        self.remove(request)
    }

    pub fn state(&self, key: &str) -> RequestState {
        let entries = self.entries.lock();
        match entries.get(key) {
            None => RequestState::Idle,
            Some(entry) => match entry.execution.peek() {
                None => RequestState::Running,
                Some(Ok(_)) => RequestState::Completed,
                // Errors are evicted by the caller that observes them
                Some(Err(_)) => RequestState::Idle,
            },
        }
    }

    /// Drop every entry. Callers already holding an execution still get its result.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!("Clearing request cache ({} entries)", entries.len());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.len())
            .finish()
    }
}
