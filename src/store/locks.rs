use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::warn;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ExchangeError, Result};

pub type KeyGuard = OwnedMutexGuard<()>;

/// Slot count below which idle slots are left in place.
const PRUNE_FLOOR: usize = 1024;

struct Slots<K> {
    map: HashMap<K, Arc<AsyncMutex<()>>>,
    prune_at: usize,
}

/// One async mutex per key. Holders of a key's guard are the only writers of that key's state.
/// Idle slots are dropped once the map doubles past its last pruned size.
pub struct KeyedLocks<K> {
    name: &'static str,
    slots: Mutex<Slots<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.map.len() >= slots.prune_at {
            // Slots are only cloned under this mutex, so a count of one means no holder or waiter.
            slots.map.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.prune_at = (slots.map.len() * 2).max(PRUNE_FLOOR);
        }
        slots.map.entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).map.len()
    }

    pub async fn acquire(&self, key: &K, timeout: Duration) -> Result<KeyGuard> {
        let slot = self.slot(key);
        tokio::time::timeout(timeout, slot.lock_owned())
            .await
            .map_err(|_| {
                warn!("{} lock {:?} not acquired within {:?}", self.name, key, timeout);
                ExchangeError::Busy(format!("{} lock {:?}", self.name, key))
            })
    }

    /// Acquires every key in sorted order under a single deadline.
    pub async fn acquire_many<I>(&self, keys: I, timeout: Duration) -> Result<Vec<KeyGuard>>
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let slots: Vec<Arc<AsyncMutex<()>>> = keys.iter().map(|k| self.slot(k)).collect();
        let acquire = async move {
            let mut guards = Vec::with_capacity(slots.len());
            for slot in slots {
                guards.push(slot.lock_owned().await);
            }
            guards
        };

        tokio::time::timeout(timeout, acquire).await.map_err(|_| {
            warn!("{} locks {:?} not acquired within {:?}", self.name, keys, timeout);
            ExchangeError::Busy(format!("{} locks {:?}", self.name, keys))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_as_busy() {
        let locks: KeyedLocks<u64> = KeyedLocks::new("content");
        let _held = locks.acquire(&7, Duration::from_millis(50)).await.unwrap();

        let err = locks.acquire(&7, Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(locks.acquire(&8, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn guard_release_unblocks_waiter() {
        let locks: Arc<KeyedLocks<u64>> = Arc::new(KeyedLocks::new("content"));
        let held = locks.acquire(&1, Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&1, Duration::from_secs(1)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn acquire_many_dedups_keys() {
        let locks: KeyedLocks<(u64, u8)> = KeyedLocks::new("wallet");
        let guards = locks
            .acquire_many(vec![(2, 0), (1, 0), (2, 0)], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn idle_slots_are_pruned_and_held_ones_survive() {
        let locks: KeyedLocks<u64> = KeyedLocks::new("wallet");
        let _held = locks.acquire(&0, Duration::from_millis(50)).await.unwrap();

        for key in 1..=3 * PRUNE_FLOOR as u64 {
            drop(locks.acquire(&key, Duration::from_millis(50)).await.unwrap());
        }

        assert!(locks.tracked() <= PRUNE_FLOOR);
        assert!(locks.acquire(&0, Duration::from_millis(20)).await.unwrap_err().is_retryable());
    }
}
