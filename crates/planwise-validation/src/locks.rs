//! Keyed locks serializing trials on the same table and index definition

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Identifies what a trial touches: the table plus the exact change applied
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrialKey {
    pub table: String,
    pub definition: String,
}

impl TrialKey {
    pub fn new(table: &str, definition: &str) -> Self {
        Self {
            table: table.to_ascii_lowercase(),
            definition: definition.trim().trim_end_matches(';').to_string(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<TrialKey, Arc<AsyncMutex<()>>>>>;

/// Registry handing out one async lock per `TrialKey`.
///
/// Clones share the same registry. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Clone, Default)]
pub struct TrialLocks {
    registry: Registry,
}

impl TrialLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &TrialKey) -> Arc<AsyncMutex<()>> {
        self.registry
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits until no other trial holds `key`
    pub async fn acquire(&self, key: TrialKey) -> TrialPermit {
        let guard = self.entry(&key).lock_owned().await;
        tracing::debug!(table = %key.table, "trial lock acquired");
        TrialPermit {
            key,
            guard: Some(guard),
            registry: self.registry.clone(),
        }
    }

    /// Takes the lock only if it is free right now
    pub fn try_acquire(&self, key: TrialKey) -> Option<TrialPermit> {
        let guard = self.entry(&key).try_lock_owned().ok();
        let permit = TrialPermit {
            key,
            guard,
            registry: self.registry.clone(),
        };
        // dropping an unlocked permit still prunes the entry
        permit.guard.is_some().then_some(permit)
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to run a trial for one key, released on drop
pub struct TrialPermit {
    key: TrialKey,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl TrialPermit {
    pub fn key(&self) -> &TrialKey {
        &self.key
    }
}

impl Drop for TrialPermit {
    fn drop(&mut self) {
        self.guard.take();
        let mut registry = self.registry.lock();
        if registry
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            registry.remove(&self.key);
        }
    }
}
