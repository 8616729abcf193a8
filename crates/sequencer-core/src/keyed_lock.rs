//! Per-key async serialization, used to keep advancement of a single clock
//! serialized while advancements of different clocks proceed in parallel
//! (spec §5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of lazily-created async mutexes, one per key.
///
/// Unlike locking a single shared mutex for "all clocks", this only
/// serializes operations that share a key, matching spec §4.6/§5's
/// requirement that different clocks advance independently.
pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + std::hash::Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Acquire the lock for `key`, creating it if this is the first use.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };

        entry.lock_owned().await
    }
}
