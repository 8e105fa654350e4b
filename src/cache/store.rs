//! Persistence contract and the in-memory LRU store

use crate::cache::{
    entry::{EntryHeader, StoredEntry},
    fingerprint::RequestIdentity,
    invalidation::{ClearFilter, InvalidationEvent, InvalidationReason},
    types::CacheStats,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default bound of the in-memory store
pub const DEFAULT_MAX_ENTRIES: usize = 20;

/// Storage of serialised entries keyed by request hash.
///
/// Implementations must make `put` atomic: a concurrent `get` sees either the
/// previous entry or the new one, never a partial write. Concurrent writers
/// for the same key resolve as last-writer-wins.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Look up the entry of a request
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<StoredEntry>>;

    /// Store an entry, replacing any previous one with the same request hash
    async fn put(&self, entry: StoredEntry) -> Result<()>;

    /// Reset the expiry date of a request's entry to the epoch.
    ///
    /// Returns `true` only if an entry existed and was not already invalidated.
    async fn invalidate(&self, identity: &RequestIdentity) -> Result<bool>;

    /// Remove every entry selected by the filter, returning how many went
    async fn clear(&self, filter: &ClearFilter) -> Result<usize>;

    /// Headers of every stored entry
    async fn list(&self) -> Result<Vec<EntryHeader>>;

    /// Backend counters
    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// In-memory store with LRU eviction
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - LRU eviction once `max_entries` is reached
/// - Hit, miss and eviction counters
#[derive(Clone)]
pub struct MemoryStore {
    max_entries: usize,

    /// Internal storage
    store: Arc<RwLock<EntryStore>>,
}

/// Internal storage
struct EntryStore {
    /// Main storage: request hash -> entry
    entries: HashMap<String, StoredEntry>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<String>,

    stats: CacheStats,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryStore {
    /// Create a store holding at most `max_entries` entries
    pub fn new(max_entries: usize) -> Self {
        info!("Initializing memory store (max entries: {})", max_entries);

        let store = EntryStore {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
        };

        Self {
            max_entries: max_entries.max(1),
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Get number of entries in the store
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }
}

impl EntryStore {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) -> Option<StoredEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        Some(entry)
    }

    fn evict_if_needed(&mut self, max_entries: usize) {
        while self.entries.len() >= max_entries {
            let Some(key) = self.lru_queue.pop_front() else {
                break;
            };
            debug!("Evicting entry due to max_entries limit: {}", key);
            self.entries.remove(&key);
            self.stats.evictions += 1;

            let event =
                InvalidationEvent::new(InvalidationReason::LeastRecentlyUsed, vec![key], Utc::now());
            debug!("{}", event);
        }
    }

    fn update_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.size_bytes = self.entries.values().map(StoredEntry::size_bytes).sum();
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
        let mut store = self.store.write().await;

        let found = store
            .entries
            .get(&identity.request_hash)
            .filter(|entry| entry.class_hash() == identity.class_hash)
            .cloned();

        match found {
            Some(entry) => {
                store.stats.hits += 1;
                store.touch(&identity.request_hash);
                debug!("Store hit: {}", identity);
                Ok(Some(entry))
            }
            None => {
                store.stats.misses += 1;
                debug!("Store miss: {}", identity);
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        let key = entry.request_hash().to_string();
        let mut store = self.store.write().await;

        if store.entries.contains_key(&key) {
            debug!("Replacing stored entry: {}", key);
        } else {
            store.evict_if_needed(self.max_entries);
            debug!("Inserting stored entry: {}", key);
        }

        store.entries.insert(key.clone(), entry);
        store.touch(&key);
        store.update_stats();

        Ok(())
    }

    async fn invalidate(&self, identity: &RequestIdentity) -> Result<bool> {
        let mut store = self.store.write().await;

        let Some(entry) = store.entries.get_mut(&identity.request_hash) else {
            return Ok(false);
        };

        if entry.header.is_invalidated() {
            return Ok(false);
        }

        *entry = entry.invalidated();
        store.stats.invalidations += 1;

        let event = InvalidationEvent::new(
            InvalidationReason::Invalidated,
            vec![identity.request_hash.clone()],
            Utc::now(),
        );
        debug!("{}", event);

        Ok(true)
    }

    async fn clear(&self, filter: &ClearFilter) -> Result<usize> {
        let mut store = self.store.write().await;

        let keys: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.header))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            store.remove_entry(key);
        }

        store.stats.cleared += keys.len() as u64;
        store.update_stats();

        let event = InvalidationEvent::new(InvalidationReason::Cleared, keys, filter.now)
            .with_context(format!("{:?}, stale only: {}", filter.target, filter.stale_only));
        info!("Memory store: {}", event);

        Ok(event.keys.len())
    }

    async fn list(&self) -> Result<Vec<EntryHeader>> {
        let store = self.store.read().await;
        Ok(store.entries.values().map(|e| e.header.clone()).collect())
    }

    async fn stats(&self) -> CacheStats {
        self.store.read().await.stats.clone()
    }
}
