use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;

use super::{PdfCacheConfig, ResourceHandle};
use crate::types::ResourcePath;

/// Aggregate numbers about the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub aggregate_size_bytes: u64,
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemovalReason {
    Expired,
    Evicted,
    Invalidated,
    Cleared,
}

impl RemovalReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Evicted => "evicted",
            Self::Invalidated => "invalidated",
            Self::Cleared => "cleared",
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    handle: ResourceHandle,
    size: u64,
    last_access: Instant,
    /// The load that produced this entry.
    load_id: u64,
    /// Callers of that load that have not received the handle yet.
    pending_waiters: usize,
}

impl CacheEntry {
    /// Releases the payload, unless waiting callers are still to receive it.
    ///
    /// In that case the handle leaves the cache unreleased and belongs to those callers.
    fn release(&self) {
        if self.pending_waiters == 0 {
            self.handle.release();
        }
    }
}

/// The map of cached payloads in access order, together with its size accounting.
///
/// The least recently used entry sits at the back of `entries`. Access times are taken while
/// the cache lock is held, so they never decrease from the back to the front.
#[derive(Debug)]
pub(crate) struct CacheStore {
    entries: LruCache<ResourcePath, CacheEntry>,
    aggregate_size: u64,
    max_aggregate_bytes: u64,
    max_entry_count: usize,
}

impl CacheStore {
    pub fn new(config: &PdfCacheConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            aggregate_size: 0,
            max_aggregate_bytes: config.max_aggregate_bytes,
            max_entry_count: config.max_entry_count,
        }
    }

    /// Looks up an entry, marking it as most recently used.
    pub fn touch(&mut self, key: &ResourcePath, now: Instant) -> Option<ResourceHandle> {
        let entry = self.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.handle.clone())
    }

    pub fn contains(&self, key: &ResourcePath) -> bool {
        self.entries.contains(key)
    }

    /// Removes every entry whose last access lies more than `window` before `now`.
    pub fn sweep_expired(&mut self, now: Instant, window: Duration) -> usize {
        let mut expired = 0;
        while let Some((_, oldest)) = self.entries.peek_lru() {
            if now.saturating_duration_since(oldest.last_access) <= window {
                break;
            }
            if let Some((key, entry)) = self.entries.pop_lru() {
                self.retire(&key, entry, RemovalReason::Expired);
                expired += 1;
            }
        }
        expired
    }

    /// Stores the payload of load `load_id`, evicting least recently used entries to stay
    /// within the configured limits.
    ///
    /// `pending_waiters` callers of the load are still to receive the handle. Evicting the
    /// entry before [`unpin`](Self::unpin) was called for each of them leaves the handle to
    /// those callers instead of releasing it.
    ///
    /// Returns `false` if the payload cannot be retained at all, because it alone exceeds the
    /// size ceiling or the cache holds no entries. No other entry is evicted in that case.
    pub fn insert(
        &mut self,
        key: ResourcePath,
        handle: ResourceHandle,
        now: Instant,
        load_id: u64,
        pending_waiters: usize,
    ) -> bool {
        let size = handle.len();
        if size > self.max_aggregate_bytes || self.max_entry_count == 0 {
            tracing::debug!(
                path = %key,
                size,
                max_bytes = self.max_aggregate_bytes,
                max_entries = self.max_entry_count,
                "payload exceeds the cache limits, not caching"
            );
            return false;
        }

        // A reload of a key that was invalidated while loading replaces the old entry.
        if let Some(old) = self.entries.pop(&key) {
            self.retire(&key, old, RemovalReason::Invalidated);
        }

        while self.aggregate_size + size > self.max_aggregate_bytes
            || self.entries.len() + 1 > self.max_entry_count
        {
            let Some((oldest, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.retire(&oldest, entry, RemovalReason::Evicted);
        }

        self.aggregate_size += size;
        self.entries.put(
            key,
            CacheEntry {
                handle,
                size,
                last_access: now,
                load_id,
                pending_waiters,
            },
        );
        self.report_gauges();
        true
    }

    /// Records that one caller of load `load_id` received its handle or stopped waiting.
    pub fn unpin(&mut self, key: &ResourcePath, load_id: u64) {
        if let Some(entry) = self.entries.peek_mut(key) {
            if entry.load_id == load_id {
                entry.pending_waiters = entry.pending_waiters.saturating_sub(1);
            }
        }
    }

    /// Removes and releases a single entry.
    pub fn remove(&mut self, key: &ResourcePath, reason: RemovalReason) -> bool {
        let Some(entry) = self.entries.pop(key) else {
            return false;
        };
        self.retire(key, entry, reason);
        true
    }

    fn retire(&mut self, key: &ResourcePath, entry: CacheEntry, reason: RemovalReason) {
        entry.release();
        self.aggregate_size -= entry.size;

        tracing::trace!(path = %key, reason = reason.as_str(), "removed cached pdf");
        metric!(counter("pdf_cache.evicted") += 1, "reason" => reason.as_str());
        self.report_gauges();
    }

    /// Releases and removes every entry.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.iter() {
            entry.release();
        }
        self.entries.clear();
        self.aggregate_size = 0;

        if count > 0 {
            metric!(counter("pdf_cache.evicted") += count as i64, "reason" => RemovalReason::Cleared.as_str());
        }
        self.report_gauges();
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            aggregate_size_bytes: self.aggregate_size,
        }
    }

    fn report_gauges(&self) {
        metric!(gauge("pdf_cache.entries") = self.entries.len() as u64);
        metric!(gauge("pdf_cache.bytes") = self.aggregate_size);
    }
}
