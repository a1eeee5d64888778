//! The in-memory PDF cache.
//!
//! [`PdfCache`] maps logical [`ResourcePath`]s to fetched PDF payloads. Lookups go through
//! four stages:
//!
//! 1. Entries that were not accessed within the configured expiry window are swept.
//! 2. A cached entry is returned directly and its access time is refreshed.
//! 3. If a load for the same path is already running, the caller joins it. There is never
//!    more than one load per path.
//! 4. Otherwise a new load is spawned. On success the payload is inserted, evicting the least
//!    recently used entries until both the size and the count limits hold again.
//!
//! Loads run as detached tokio tasks. A caller that stops waiting does not abort the load, and
//! a completed load populates the cache even if nobody is waiting for it anymore. Failed loads
//! are never cached: every waiting caller receives the error and the next lookup retries.
//!
//! A loaded entry stays pinned until every caller waiting on its load has received the
//! handle. Evicting or removing it earlier drops it from the cache without releasing the
//! payload, which then belongs to those callers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::time::Instant;

use crate::download::{self, Fetcher, ProgressFn};
use crate::types::ResourcePath;
use crate::utils::defer::defer;

mod cache_error;
mod config;
mod handle;
mod store;


pub use cache_error::{CacheContents, CacheError};
pub use config::PdfCacheConfig;
pub use handle::ResourceHandle;
pub use store::CacheStats;
use store::{CacheStore, RemovalReason};

type LoadFuture = Shared<BoxFuture<'static, CacheContents<ResourceHandle>>>;

/// A running load that callers for the same path can join.
struct InFlight {
    /// Distinguishes this load from a later one for the same path.
    id: u64,
    future: LoadFuture,
    /// Callers currently awaiting `future`.
    waiters: usize,
}

struct CacheState {
    store: CacheStore,
    in_flight: HashMap<ResourcePath, InFlight>,
    next_load_id: u64,
}

struct Inner {
    config: PdfCacheConfig,
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<CacheState>,
}

/// A cache of PDF payloads with request collapsing, LRU eviction and time based expiry.
///
/// Cloning the cache is cheap, all clones share the same entries.
#[derive(Clone)]
pub struct PdfCache {
    inner: Arc<Inner>,
}

enum Lookup {
    Hit(ResourceHandle),
    Pending { id: u64, future: LoadFuture },
}

impl PdfCache {
    pub fn new(config: PdfCacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let store = CacheStore::new(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                state: Mutex::new(CacheState {
                    store,
                    in_flight: HashMap::new(),
                    next_load_id: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &PdfCacheConfig {
        &self.inner.config
    }

    /// Returns the payload for `path`, fetching it if it is not cached yet.
    pub async fn get(&self, path: &str) -> CacheContents<ResourceHandle> {
        self.get_inner(path, None).await
    }

    /// Like [`get`](Self::get), and reports the download progress as integer percentages.
    ///
    /// Progress is only reported if this call starts the download. Hits and callers that join
    /// a running load for the same path receive no reports.
    pub async fn get_with_progress<F>(
        &self,
        path: &str,
        on_progress: F,
    ) -> CacheContents<ResourceHandle>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.get_inner(path, Some(Arc::new(on_progress))).await
    }

    async fn get_inner(
        &self,
        path: &str,
        on_progress: Option<ProgressFn>,
    ) -> CacheContents<ResourceHandle> {
        let key = ResourcePath::new(path)?;
        metric!(counter("pdf_cache.access") += 1);

        match self.lookup_or_spawn(&key, on_progress) {
            Lookup::Hit(handle) => Ok(handle),
            Lookup::Pending { id, future } => {
                let _waiting = defer(|| self.lock_state().stop_waiting(&key, id));
                future.await
            }
        }
    }

    /// Resolves a lookup without awaiting anything, so the state lock is never held across
    /// an await point.
    ///
    /// A `Pending` result registers the caller as a waiter of that load. It must call
    /// [`CacheState::stop_waiting`] once it received the result or gave up on it.
    fn lookup_or_spawn(&self, key: &ResourcePath, on_progress: Option<ProgressFn>) -> Lookup {
        let mut state = self.lock_state();
        let now = Instant::now();

        let expired = state.store.sweep_expired(now, self.inner.config.expiry_window);
        if expired > 0 {
            tracing::debug!(expired, "swept expired pdfs");
        }

        if let Some(handle) = state.store.touch(key, now) {
            tracing::trace!(path = %key, "pdf cache hit");
            metric!(counter("pdf_cache.hit") += 1);
            return Lookup::Hit(handle);
        }

        if let Some(in_flight) = state.in_flight.get_mut(key) {
            tracing::trace!(path = %key, "joining running pdf load");
            metric!(counter("pdf_cache.dedup") += 1);
            in_flight.waiters += 1;
            return Lookup::Pending {
                id: in_flight.id,
                future: in_flight.future.clone(),
            };
        }

        metric!(counter("pdf_cache.miss") += 1);
        let id = state.next_load_id;
        state.next_load_id += 1;

        let future = self.spawn_load(key.clone(), id, on_progress);
        state.in_flight.insert(
            key.clone(),
            InFlight {
                id,
                future: future.clone(),
                waiters: 1,
            },
        );
        Lookup::Pending { id, future }
    }

    fn spawn_load(
        &self,
        key: ResourcePath,
        id: u64,
        on_progress: Option<ProgressFn>,
    ) -> LoadFuture {
        let cache = self.clone();
        let task = tokio::spawn(async move {
            // also covers a panicking fetcher, no caller may wait on a stale record
            let _cleanup = defer(|| {
                cache.lock_state().forget_load(&key, id);
            });

            let result = download::download(
                cache.inner.fetcher.as_ref(),
                &key,
                on_progress,
                cache.inner.config.verify_pdf_header,
            )
            .await;

            cache.complete_load(&key, id, &result);
            result
        });

        task.map(|joined| {
            joined.unwrap_or_else(|err| {
                tracing::error!(error = &err as &dyn std::error::Error, "pdf load task failed");
                Err(CacheError::InternalError)
            })
        })
        .boxed()
        .shared()
    }

    /// Stores a successful result and retires the in-flight record in one step.
    ///
    /// The entry is pinned for every caller still waiting on the load.
    fn complete_load(&self, key: &ResourcePath, id: u64, result: &CacheContents<ResourceHandle>) {
        let mut state = self.lock_state();
        let waiters = state.forget_load(key, id);
        if let Ok(handle) = result {
            let now = Instant::now();
            state
                .store
                .insert(key.clone(), handle.clone(), now, id, waiters);
        }
    }

    /// Starts loading `path` in the background without waiting for it.
    ///
    /// The load is registered before this returns, so a following [`get`](Self::get) joins
    /// it. Failures are logged and otherwise ignored.
    pub fn preload(&self, path: &str) {
        let key = match ResourcePath::new(path) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = &err as &dyn std::error::Error, "failed to preload pdf");
                return;
            }
        };
        metric!(counter("pdf_cache.access") += 1);

        let Lookup::Pending { id, future } = self.lookup_or_spawn(&key, None) else {
            return;
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let _waiting = defer(|| cache.lock_state().stop_waiting(&key, id));
            if let Err(err) = future.await {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    path = %key,
                    "failed to preload pdf"
                );
            }
        });
    }

    /// Removes the entry for `path` and releases its payload.
    ///
    /// Returns `true` if an entry was cached. Loads that are still running are not affected.
    pub fn invalidate(&self, path: &str) -> bool {
        let Ok(key) = ResourcePath::new(path) else {
            return false;
        };
        self.lock_state()
            .store
            .remove(&key, RemovalReason::Invalidated)
    }

    /// Releases every cached payload and empties the cache.
    ///
    /// Loads that are still running complete normally and populate the cache afterwards.
    pub fn clear(&self) {
        let cleared = self.lock_state().store.clear();
        tracing::debug!(cleared, "cleared pdf cache");
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_state().store.stats()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheState {
    /// Drops the in-flight record of load `id`, leaving any newer load for the key in place.
    ///
    /// Returns the number of callers still waiting on the load.
    fn forget_load(&mut self, key: &ResourcePath, id: u64) -> usize {
        match self.in_flight.get(key) {
            Some(in_flight) if in_flight.id == id => self
                .in_flight
                .remove(key)
                .map_or(0, |in_flight| in_flight.waiters),
            _ => 0,
        }
    }

    /// Unregisters a caller of load `id` that received the result or stopped waiting.
    fn stop_waiting(&mut self, key: &ResourcePath, id: u64) {
        match self.in_flight.get_mut(key) {
            Some(in_flight) if in_flight.id == id => {
                in_flight.waiters = in_flight.waiters.saturating_sub(1);
            }
            _ => self.store.unpin(key, id),
        }
    }
}

impl fmt::Debug for PdfCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfCache")
            .field("config", &self.inner.config)
            .field("fetcher", &self.inner.fetcher)
            .field("stats", &self.stats())
            .finish()
    }
}
