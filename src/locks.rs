//! Per-key async locking.
//!
//! Mutations on one tenant slug or project name must be strictly ordered
//! while unrelated keys proceed concurrently, so a single global lock is not
//! an option. `KeyedLocks` hands out one async mutex per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of per-key async mutexes.
///
/// Lock entries are created on first use and kept for the lifetime of the
/// map; the key space here (tenant slugs, project names) is small and
/// bounded by live records.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}
