//! Keyed exclusive locks serializing writers per session and per register.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use caja_common::{CajaError, Result};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// One async mutex per key. Different keys never contend.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    /// Create a lock table with the given acquisition bound.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire the lock for `key`, waiting at most the configured timeout.
    ///
    /// The guard releases the lock when dropped.
    pub async fn acquire(&self, key: &K) -> Result<OwnedMutexGuard<()>> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(key = %key, "Lock acquired");
                Ok(guard)
            }
            Err(_) => {
                warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Lock timed out");
                Err(CajaError::busy())
            }
        }
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of keys with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
