//! Fetch cache keyed by (connector, entity type, normalized pattern, window, limit).
//!
//! Entries live for a fixed TTL. At most one fetch per key is in flight: the first
//! caller spawns the connector request as a task and publishes a shared handle to it;
//! every later caller for the same key awaits that handle instead of issuing its own
//! request. The spawned task stores a successful response and clears the in-flight
//! slot itself, so the outcome is recorded even when every waiter has gone away.
//! Failed fetches (errors, timeouts) are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::connector::{ConnectorIssue, ConnectorQuery, ConnectorResponse};
use crate::types::TimeWindow;

pub type FetchResult = Result<Arc<ConnectorResponse>, ConnectorIssue>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub connector: String,
    pub entity_type: String,
    /// `Pattern::normalized()` text, `*` when the query has no pattern.
    pub pattern: String,
    pub window: Option<TimeWindow>,
    pub limit: Option<usize>,
}

impl CacheKey {
    pub fn new(connector: &str, query: &ConnectorQuery) -> Self {
        Self {
            connector: connector.to_string(),
            entity_type: query.entity_type.clone(),
            pattern: query.pattern.as_ref().map(|p| p.normalized()).unwrap_or_else(|| "*".to_string()),
            window: query.window,
            limit: query.limit,
        }
    }

    /// Short digest for log lines.
    pub fn digest(&self) -> String {
        let window = self.window.map(|w| w.to_string()).unwrap_or_default();
        let text = format!("{}|{}|{}|{}|{:?}", self.connector, self.entity_type, self.pattern, window, self.limit);
        format!("{:016x}", xxh3_64(text.as_bytes()))
    }
}

/// Where a fetch result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// This caller issued the connector request.
    Fetched,
    /// A live cache entry was reused.
    Cached,
    /// This caller waited on another caller's in-flight request.
    Shared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub shared: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheEntry {
    response: Arc<ConnectorResponse>,
    fetched_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, SharedFetch>,
    seq: u64,
    stats: CacheStats,
}

impl CacheState {
    fn store(&mut self, key: CacheKey, response: Arc<ConnectorResponse>, max_entries: usize) {
        if max_entries == 0 {
            return;
        }
        self.seq += 1;
        let seq = self.seq;
        self.entries.insert(key, CacheEntry { response, fetched_at: Instant::now(), seq });
        while self.entries.len() > max_entries {
            let oldest = self.entries.iter().min_by_key(|(_, e)| e.seq).map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
    }
}

pub struct FetchCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
    max_entries: usize,
}

impl FetchCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { state: Arc::new(Mutex::new(CacheState::default())), ttl, max_entries }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Return the live entry for `key`, join the in-flight fetch for it, or start one
    /// with `fetch`. `fetch` is only called when this caller starts the request.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> (FetchResult, CacheOrigin)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let (shared, origin) = {
            let mut st = self.state.lock();
            let live = st.entries.get(&key).map(|e| (e.fetched_at.elapsed() < self.ttl, Arc::clone(&e.response)));
            match live {
                Some((true, response)) => {
                    st.stats.hits += 1;
                    debug!(target: "huntflow::federation", "cache hit: connector='{}' key={}", key.connector, key.digest());
                    return (Ok(response), CacheOrigin::Cached);
                }
                Some((false, _)) => {
                    st.entries.remove(&key);
                }
                None => {}
            }
            if let Some(pending) = st.inflight.get(&key).cloned() {
                st.stats.shared += 1;
                debug!(target: "huntflow::federation", "joining in-flight fetch: connector='{}' key={}", key.connector, key.digest());
                (pending, CacheOrigin::Shared)
            } else {
                st.stats.misses += 1;
                let state = Arc::clone(&self.state);
                let task_key = key.clone();
                let max_entries = self.max_entries;
                let request = fetch();
                // Spawned while the lock is held: the task cannot clear the in-flight
                // slot before it has been published below.
                let handle = tokio::spawn(async move {
                    let result = request.await;
                    let mut st = state.lock();
                    st.inflight.remove(&task_key);
                    if let Ok(response) = &result {
                        st.store(task_key, Arc::clone(response), max_entries);
                    }
                    result
                });
                let shared: SharedFetch = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(ConnectorIssue::Error(format!("fetch task failed: {}", e))),
                    }
                }
                .boxed()
                .shared();
                st.inflight.insert(key, shared.clone());
                (shared, CacheOrigin::Fetched)
            }
        };
        (shared.await, origin)
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        CacheStats { entries: st.entries.len(), ..st.stats }
    }

    pub fn len(&self) -> usize { self.state.lock().entries.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Drop every entry. In-flight fetches finish but their results land in an emptied
    /// cache. Returns the number of entries discarded.
    pub fn clear(&self) -> usize {
        let mut st = self.state.lock();
        let n = st.entries.len();
        st.entries.clear();
        n
    }
}
