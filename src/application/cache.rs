//! Per-session memoization of descriptor and channel lookups
//!
//! Entries are written once per code unless the caller forces a refresh. No
//! TTL: the engine clears both tables when a new query is submitted.
//!
//! Two lookups for the same code that start before either finishes are not
//! coalesced; both reach the backend and the later write wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::domain::{ChannelRecord, Descriptor};

/// Hit/miss counters, mostly for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Code-keyed memo table
#[derive(Debug)]
pub struct MemoCache<V> {
    entries: RwLock<HashMap<String, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> Default for MemoCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<V: Clone + Send + Sync> MemoCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn has(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn set(&self, key: &str, value: V) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached value, or runs `fetch` and stores its result.
    ///
    /// With `force_fetch` the cache is bypassed and a successful result
    /// overwrites the entry. Failures are never cached. No lock is held while
    /// `fetch` runs.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, force_fetch: bool, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !force_fetch {
            if let Some(value) = self.get(key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = fetch().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }
}

/// The two lookup tables of one query session
#[derive(Debug, Default)]
pub struct DetailCache {
    pub descriptors: MemoCache<Descriptor>,
    pub channels: MemoCache<Vec<ChannelRecord>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self) {
        self.descriptors.clear().await;
        self.channels.clear().await;
    }
}
