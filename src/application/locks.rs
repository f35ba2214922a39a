use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Instant, timeout_at};

/// Per-account exclusive locks, allocated on demand and held only for the
/// duration of a commit unit. Keys are the lexicographic account keys
/// (`owner:CURRENCY`); acquiring in sorted key order means two transfers
/// touching the same pair of accounts can never deadlock, while transfers
/// on disjoint pairs proceed fully in parallel.
pub(crate) struct AccountLocks {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

/// Guards for the accounts touched by one commit unit. Dropping releases
/// every lock.
pub(crate) struct AccountGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    async fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire exclusive locks on the given account keys in lexicographic
    /// order. Returns `None` if the whole set cannot be acquired before
    /// the timeout; locks taken so far are released on the way out.
    pub async fn acquire(&self, mut keys: Vec<String>) -> Option<AccountGuards> {
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.acquire_timeout;
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.entry(&key).await;
            match timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => return None,
            }
        }
        Some(AccountGuards { _guards: guards })
    }
}
