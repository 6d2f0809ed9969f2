//! Per-name deployment locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes deployments targeting the same container name.
///
/// Deployments for different names never wait on each other.
#[derive(Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one replacement
pub struct NameGuard {
    _guard: OwnedMutexGuard<()>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other deployment holds `name`
    pub async fn acquire(&self, name: &str) -> NameGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // drop entries nobody is holding or waiting on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        NameGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of names currently tracked
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
