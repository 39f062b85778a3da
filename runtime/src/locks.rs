//! Per-key critical sections.
//!
//! Every mutation of a ticket runs while holding that ticket's lock; mutations
//! of different tickets never contend. Opening a ticket also holds its owner's
//! lock, so one user's creates run one at a time. Waiting is bounded: an
//! attempt that cannot get the lock within its wait fails instead of queueing
//! forever.
//!
//! Lock entries live in the registry only while someone holds or waits for
//! them, so memory follows contention, not key count.

use kawach_core::{EngineError, TicketId, UserId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

type Registry<K> = Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>;

/// Registry of async locks, one per key
pub struct KeyedLocks<K> {
    registry: Registry<K>,
}

/// Per-ticket locks
pub type TicketLocks = KeyedLocks<TicketId>;
/// Per-user locks, held while a user opens a ticket
pub type UserLocks = KeyedLocks<UserId>;
/// Held ticket lock
pub type TicketGuard = KeyGuard<TicketId>;

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take the lock of `key`, waiting at most `wait`; `None` when the wait expired.
    pub async fn try_acquire(&self, key: K, wait: Duration) -> Option<KeyGuard<K>> {
        let lock = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(registry.entry(key.clone()).or_default())
        };

        if let Ok(guard) = tokio::time::timeout(wait, lock.lock_owned()).await {
            Some(KeyGuard {
                key,
                guard: Some(guard),
                registry: Arc::clone(&self.registry),
            })
        } else {
            prune(&self.registry, &key);
            None
        }
    }

    /// Number of keys that currently have a holder or waiter
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl KeyedLocks<TicketId> {
    /// Take the lock of `ticket_id`, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Busy`] when the wait expired.
    pub async fn acquire(&self, ticket_id: TicketId, wait: Duration) -> Result<TicketGuard, EngineError> {
        match self.try_acquire(ticket_id, wait).await {
            Some(guard) => Ok(guard),
            None => {
                tracing::debug!(
                    %ticket_id,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "ticket lock wait expired"
                );
                Err(EngineError::Busy { ticket_id })
            }
        }
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K> std::fmt::Debug for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("tracked", &self.tracked())
            .finish()
    }
}

/// Held lock of one key; released on drop
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry<K>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    /// Key this guard serializes
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release under the registry lock so a new waiter cannot clone the
        // entry between the release and the prune.
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if registry
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            registry.remove(&self.key);
        }
    }
}

fn prune<K>(registry: &Registry<K>, key: &K)
where
    K: Eq + Hash,
{
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if registry
        .get(key)
        .is_some_and(|entry| Arc::strong_count(entry) == 1)
    {
        registry.remove(key);
    }
}
