//! Response cache seam
//!
//! The scheduler is handed an `Arc<dyn ResponseCache>`; production uses the
//! SQLite-backed [`SqliteCache`], tests use [`MemoryCache`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use responsecache::{CacheError, CacheStats, ResponseStore};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Durable key/value store of serialized responses
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value; last write for a key wins
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Remove every entry, returning how many were removed
    async fn clear(&self) -> Result<usize, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Per-key async locks
///
/// Holders of the same key queue behind one another; different keys never
/// contend. Entries are dropped once no holder or waiter remains.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.map().entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

/// Held lock on one key; released on drop
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        drop(self.guard.take());
        // map + nobody else: no one is waiting on this key
        if map.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.key);
        }
    }
}

/// [`ResponseCache`] over a SQLite [`ResponseStore`]
///
/// Blocking SQLite calls run on the blocking thread pool.
pub struct SqliteCache {
    store: Arc<ResponseStore>,
    writers: KeyLocks,
}

impl SqliteCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        debug!(path = %path.as_ref().display(), "SqliteCache::open: called");
        Ok(Self::new(ResponseStore::open(path)?))
    }

    pub fn new(store: ResponseStore) -> Self {
        Self {
            store: Arc::new(store),
            writers: KeyLocks::default(),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&ResponseStore) -> Result<T, CacheError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = key.to_string();
        self.blocking(move |store| store.get(&key)).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let _guard = self.writers.acquire(key).await;
        let owned_key = key.to_string();
        self.blocking(move |store| store.set(&owned_key, &value)).await
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        self.blocking(|store| store.clear()).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.blocking(|store| store.stats()).await
    }
}

/// In-memory [`ResponseCache`] for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, i64)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries().get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries().insert(key.to_string(), (value, responsecache::now_ms()));
        Ok(())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries();
        Ok(CacheStats {
            entry_count: entries.len() as u64,
            total_bytes: entries.values().map(|(v, _)| v.len() as u64).sum(),
            oldest_inserted_at: entries.values().map(|(_, t)| *t).min(),
            newest_inserted_at: entries.values().map(|(_, t)| *t).max(),
        })
    }
}
