//! Bounded thumbnail cache with coalesced asynchronous decoding
//!
//! - A hit returns the stored texture without touching the decoder.
//! - Concurrent misses for one key share a single decode; every waiter
//!   observes the same texture or the same failure.
//! - When full, the oldest *inserted* entry is evicted (FIFO, not LRU).
//! - A failed decode leaves the cache untouched.
//!
//! Decodes run on the tokio blocking pool and finish even if every waiter
//! has gone away.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("decode failed for {key}: {reason}")]
    DecodeFailed { key: String, reason: String },

    #[error("decode for {key} ended without a result")]
    Abandoned { key: String },
}

/// Turns a locator (path or URL) into a texture
pub trait TextureDecoder<T>: Send + Sync + 'static {
    fn decode(&self, locator: &str) -> anyhow::Result<T>;
}

type Outcome<T> = Option<Result<T, CacheError>>;

struct State<T> {
    entries: HashMap<String, T>,
    /// Insertion order of `entries`, oldest first
    order: VecDeque<String>,
    pending: HashMap<String, watch::Receiver<Outcome<T>>>,
}

/// Counters for diagnostics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub decodes: AtomicU64,
    pub failures: AtomicU64,
    pub evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub decodes: u64,
    pub failures: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    decoder: Arc<dyn TextureDecoder<T>>,
    capacity: usize,
    runtime: Handle,
    stats: CacheStats,
}

/// Outcome of a non-blocking [`TextureCache::prefetch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefetch {
    Ready,
    InFlight,
    Started,
}

enum Lookup<T> {
    Hit(T),
    Wait(watch::Receiver<Outcome<T>>),
    Started(watch::Receiver<Outcome<T>>),
}

/// Cheap to clone; clones share the same entries.
pub struct TextureCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TextureCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TextureCache<T> {
    pub fn new<D: TextureDecoder<T>>(capacity: usize, decoder: D, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    order: VecDeque::new(),
                    pending: HashMap::new(),
                }),
                decoder: Arc::new(decoder),
                capacity,
                runtime,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Texture for `key`, decoding `locator` on a miss.
    pub async fn acquire(&self, key: &str, locator: &str) -> Result<T, CacheError> {
        match self.lookup(key, locator) {
            Lookup::Hit(texture) => Ok(texture),
            Lookup::Wait(rx) | Lookup::Started(rx) => wait_outcome(key, rx).await,
        }
    }

    /// Starts a decode for `key` if it is neither cached nor in flight.
    ///
    /// `on_done` runs once the decode this call started has settled; it is
    /// not called for hits or when another decode is already running.
    pub fn prefetch<F>(&self, key: &str, locator: &str, on_done: F) -> Prefetch
    where
        F: FnOnce(Result<T, CacheError>) + Send + 'static,
    {
        match self.lookup(key, locator) {
            Lookup::Hit(_) => Prefetch::Ready,
            Lookup::Wait(_) => Prefetch::InFlight,
            Lookup::Started(rx) => {
                let key = key.to_string();
                self.shared.runtime.spawn(async move {
                    on_done(wait_outcome(&key, rx).await);
                });
                Prefetch::Started
            }
        }
    }

    /// Cached texture for `key`, without starting a decode
    pub fn get(&self, key: &str) -> Option<T> {
        lock(&self.shared.state).entries.get(key).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.shared.state).entries.contains_key(key)
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.shared.state).pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn lookup(&self, key: &str, locator: &str) -> Lookup<T> {
        let stats = &self.shared.stats;
        let mut state = lock(&self.shared.state);

        if let Some(texture) = state.entries.get(key) {
            stats.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(texture.clone());
        }
        if let Some(rx) = state.pending.get(key) {
            stats.coalesced.fetch_add(1, Ordering::Relaxed);
            return Lookup::Wait(rx.clone());
        }

        stats.misses.fetch_add(1, Ordering::Relaxed);
        stats.decodes.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        state.pending.insert(key.to_string(), rx.clone());
        drop(state);

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let locator = locator.to_string();
        self.shared.runtime.spawn(async move {
            let decoder = Arc::clone(&shared.decoder);
            let decode_locator = locator.clone();
            let result = match tokio::task::spawn_blocking(move || decoder.decode(&decode_locator)).await {
                Ok(Ok(texture)) => Ok(texture),
                Ok(Err(e)) => Err(CacheError::DecodeFailed {
                    key: key.clone(),
                    reason: format!("{:#}", e),
                }),
                Err(e) => Err(CacheError::DecodeFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                }),
            };
            shared.complete(&key, result, tx);
        });

        Lookup::Started(rx)
    }
}

impl<T: Clone> Shared<T> {
    /// Publishes a finished decode: insert (evicting oldest first) on
    /// success, then clear the pending marker and wake waiters.
    fn complete(&self, key: &str, result: Result<T, CacheError>, tx: watch::Sender<Outcome<T>>) {
        {
            let mut state = lock(&self.state);
            state.pending.remove(key);

            match &result {
                Ok(texture) => {
                    while state.entries.len() >= self.capacity {
                        let Some(oldest) = state.order.pop_front() else {
                            break;
                        };
                        state.entries.remove(&oldest);
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!("Evicted texture {}", oldest);
                    }
                    if self.capacity > 0 {
                        state.entries.insert(key.to_string(), texture.clone());
                        state.order.push_back(key.to_string());
                    }
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("{}", e);
                }
            }
        }
        // No receivers left is fine: the entry is cached regardless
        tx.send(Some(result)).ok();
    }
}

async fn wait_outcome<T: Clone>(key: &str, mut rx: watch::Receiver<Outcome<T>>) -> Result<T, CacheError> {
    let abandoned = || CacheError::Abandoned { key: key.to_string() };
    let outcome = rx
        .wait_for(|o| o.is_some())
        .await
        .map_err(|_| abandoned())?
        .clone();
    outcome.unwrap_or_else(|| Err(abandoned()))
}

fn lock<T>(state: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    // A panic while holding the lock leaves the maps consistent
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
