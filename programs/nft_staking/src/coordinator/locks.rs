//! Keyed async locks with bounded waits.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::constants::LOCK_TABLE_PRUNE_THRESHOLD;
use crate::error::{Result, StakingError};

/// One async mutex per key, created on first use.
#[derive(Debug)]
pub struct LockTable<K> {
    label: &'static str,
    timeout: Duration,
    entries: parking_lot::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        Self {
            label,
            timeout,
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Waits up to the table's timeout for the lock on `key`.
    pub async fn acquire(&self, key: &K) -> Result<OwnedMutexGuard<()>> {
        let mutex = {
            let mut entries = self.entries.lock();
            if entries.len() >= LOCK_TABLE_PRUNE_THRESHOLD {
                // Entries nobody holds or waits on.
                entries.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            }
            entries.entry(key.clone()).or_default().clone()
        };

        tokio::time::timeout(self.timeout, mutex.lock_owned())
            .await
            .map_err(|_| StakingError::LockTimeout {
                resource: format!("{} {}", self.label, key),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
